//! Static import analysis for generated Python code.
//!
//! Imports are read from the tree-sitter syntax tree; the code is never executed.
//! Any syntax error yields an empty set so a malformed generation degrades to
//! "nothing to install" rather than failing the pipeline.

use std::cell::RefCell;
use std::collections::BTreeSet;

use tree_sitter::{Node, Parser};

thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // Ignore error here - a parser without a language returns no tree.
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });
}

/// Modules materialized inside the project itself. Never installed.
pub const PROJECT_MODULES: &[&str] = &["method", "run_experiment", "src", "tests"];

/// Import names whose installable package name differs.
const PIP_OVERRIDES: &[(&str, &str)] = &[
    ("PIL", "pillow"),
    ("attr", "attrs"),
    ("bs4", "beautifulsoup4"),
    ("cv2", "opencv-python"),
    ("gi", "PyGObject"),
    ("sklearn", "scikit-learn"),
    ("wx", "wxPython"),
    ("yaml", "pyyaml"),
];

/// Python standard library top-level module names (3.10+).
const STDLIB_MODULES: &[&str] = &[
    "__future__", "_thread", "abc", "aifc", "argparse", "array", "ast", "asynchat",
    "asyncio", "asyncore", "atexit", "audioop", "base64", "bdb", "binascii", "bisect",
    "builtins", "bz2", "cProfile", "calendar", "cgi", "cgitb", "chunk", "cmath", "cmd",
    "code", "codecs", "codeop", "collections", "colorsys", "compileall", "concurrent",
    "configparser", "contextlib", "contextvars", "copy", "copyreg", "crypt", "csv",
    "ctypes", "curses", "dataclasses", "datetime", "dbm", "decimal", "difflib", "dis",
    "doctest", "email", "encodings", "ensurepip", "enum", "errno", "faulthandler",
    "fcntl", "filecmp", "fileinput", "fnmatch", "fractions", "ftplib", "functools",
    "gc", "getopt", "getpass", "gettext", "glob", "graphlib", "grp", "gzip", "hashlib",
    "heapq", "hmac", "html", "http", "idlelib", "imaplib", "imghdr", "importlib",
    "inspect", "io", "ipaddress", "itertools", "json", "keyword", "lib2to3",
    "linecache", "locale", "logging", "lzma", "mailbox", "mailcap", "marshal", "math",
    "mimetypes", "mmap", "modulefinder", "msvcrt", "multiprocessing", "netrc", "nis",
    "nntplib", "ntpath", "numbers", "opcode", "operator", "optparse", "os",
    "ossaudiodev", "pathlib", "pdb", "pickle", "pickletools", "pipes", "pkgutil",
    "platform", "plistlib", "poplib", "posix", "posixpath", "pprint", "profile",
    "pstats", "pty", "pwd", "py_compile", "pyclbr", "pydoc", "queue", "quopri",
    "random", "re", "readline", "reprlib", "resource", "rlcompleter", "runpy", "sched",
    "secrets", "select", "selectors", "shelve", "shlex", "shutil", "signal", "site",
    "smtpd", "smtplib", "sndhdr", "socket", "socketserver", "spwd", "sqlite3",
    "sre_compile", "sre_constants", "sre_parse", "ssl", "stat", "statistics",
    "string", "stringprep", "struct", "subprocess", "sunau", "symtable", "sys",
    "sysconfig", "syslog", "tabnanny", "tarfile", "telnetlib", "tempfile", "termios",
    "textwrap", "threading", "time", "timeit", "tkinter", "token", "tokenize",
    "tomllib", "trace", "traceback", "tracemalloc", "tty", "turtle", "turtledemo",
    "types", "typing", "unicodedata", "unittest", "urllib", "uu", "uuid", "venv",
    "warnings", "wave", "weakref", "webbrowser", "winreg", "winsound", "wsgiref",
    "xdrlib", "xml", "xmlrpc", "zipapp", "zipfile", "zipimport", "zlib", "zoneinfo",
];

/// Return the top-level module names imported anywhere in `code`.
///
/// Relative imports (`from . import x`) are skipped. Returns an empty set when
/// the code does not parse cleanly.
pub fn extract_imports(code: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let Some(tree) = PYTHON_PARSER.with(|p| p.borrow_mut().parse(code, None)) else {
        return names;
    };
    let root = tree.root_node();
    if root.has_error() {
        return names;
    }
    collect_imports(root, code.as_bytes(), &mut names);
    names
}

fn collect_imports(node: Node<'_>, source: &[u8], names: &mut BTreeSet<String>) {
    match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for child in node.children_by_field_name("name", &mut cursor) {
                let dotted = match child.kind() {
                    "aliased_import" => child.child_by_field_name("name"),
                    "dotted_name" => Some(child),
                    _ => None,
                };
                if let Some(name) = dotted.and_then(|n| top_level_name(n, source)) {
                    names.insert(name);
                }
            }
        }
        "import_from_statement" => {
            if let Some(module) = node.child_by_field_name("module_name")
                && module.kind() == "dotted_name"
                && let Some(name) = top_level_name(module, source)
            {
                names.insert(name);
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_imports(child, source, names);
    }
}

fn top_level_name(node: Node<'_>, source: &[u8]) -> Option<String> {
    let text = node.utf8_text(source).ok()?;
    let first = text.split('.').next()?.trim();
    if first.is_empty() {
        return None;
    }
    Some(first.to_string())
}

pub fn is_stdlib(name: &str) -> bool {
    STDLIB_MODULES.contains(&name)
}

pub fn is_project_module(name: &str) -> bool {
    PROJECT_MODULES.contains(&name)
}

/// Names that must come from an installed distribution.
pub fn third_party(imports: &BTreeSet<String>) -> BTreeSet<String> {
    imports
        .iter()
        .filter(|name| !is_stdlib(name) && !is_project_module(name))
        .cloned()
        .collect()
}

/// Map an import name to the package name `pip` understands.
pub fn pip_name(import_name: &str) -> &str {
    PIP_OVERRIDES
        .iter()
        .find(|(import, _)| *import == import_name)
        .map(|(_, package)| *package)
        .unwrap_or(import_name)
}

/// Dependency manifest text: `pyyaml` first (the entry script needs it), then
/// the sorted third-party packages.
pub fn requirements_text(imports: &BTreeSet<String>) -> String {
    let third = third_party(imports);
    let mut packages: Vec<&str> = third
        .iter()
        .map(|name| pip_name(name))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    packages.retain(|pkg| *pkg != "pyyaml");

    let mut out = String::from("pyyaml\n");
    for pkg in packages {
        out.push_str(pkg);
        out.push('\n');
    }
    out
}
