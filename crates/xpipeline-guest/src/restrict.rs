//! Static capability checks over guest source, applied before anything runs.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;
use xpipeline_types::{GuestLanguage, ModuleCategory, SandboxViolation, SecurityPolicy, ViolationKind};

const PYTHON_DENIED: &[(&str, ModuleCategory)] = &[
    ("os", ModuleCategory::FileSystem),
    ("shutil", ModuleCategory::FileSystem),
    ("pathlib", ModuleCategory::FileSystem),
    ("glob", ModuleCategory::FileSystem),
    ("tempfile", ModuleCategory::FileSystem),
    ("fileinput", ModuleCategory::FileSystem),
    ("io", ModuleCategory::FileSystem),
    ("socket", ModuleCategory::Network),
    ("ssl", ModuleCategory::Network),
    ("http", ModuleCategory::Network),
    ("urllib", ModuleCategory::Network),
    ("urllib3", ModuleCategory::Network),
    ("requests", ModuleCategory::Network),
    ("ftplib", ModuleCategory::Network),
    ("smtplib", ModuleCategory::Network),
    ("asyncio", ModuleCategory::Network),
    ("signal", ModuleCategory::Process),
    ("multiprocessing", ModuleCategory::Process),
    ("ctypes", ModuleCategory::Process),
    ("resource", ModuleCategory::Process),
    ("sys", ModuleCategory::Process),
    ("subprocess", ModuleCategory::Subprocess),
    ("pty", ModuleCategory::Subprocess),
];

const JS_DENIED: &[(&str, ModuleCategory)] = &[
    ("fs", ModuleCategory::FileSystem),
    ("fs/promises", ModuleCategory::FileSystem),
    ("net", ModuleCategory::Network),
    ("http", ModuleCategory::Network),
    ("https", ModuleCategory::Network),
    ("http2", ModuleCategory::Network),
    ("dgram", ModuleCategory::Network),
    ("dns", ModuleCategory::Network),
    ("tls", ModuleCategory::Network),
    ("os", ModuleCategory::Process),
    ("cluster", ModuleCategory::Process),
    ("worker_threads", ModuleCategory::Process),
    ("child_process", ModuleCategory::Subprocess),
];

/// Modules whose only purpose is evaluating code built at run time.
const JS_DYNAMIC_MODULES: &[&str] = &["vm"];
const PYTHON_DYNAMIC_MODULES: &[&str] = &["code", "codeop", "importlib", "runpy"];

/// One module reference found in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRef {
    /// Top-level package name (`os` for `os.path`, `fs` for `node:fs`).
    pub name: String,
    pub line: usize,
}

/// Checks guest source against a [`SecurityPolicy`].
#[derive(Debug, Clone)]
pub struct CapabilityGuard {
    policy: SecurityPolicy,
}

impl CapabilityGuard {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// First violation in `source`, if any. Dynamic evaluation is reported
    /// before module problems.
    pub fn check(&self, language: GuestLanguage, source: &str) -> Result<(), SandboxViolation> {
        let stripped = strip_comments(language, source);
        if let Some((construct, line)) = find_dynamic_code(language, &stripped) {
            return Err(SandboxViolation::new(
                ViolationKind::DynamicCode,
                format!("dynamic code evaluation is not allowed: {} (line {})", construct, line),
            )
            .with_details(json!({ "construct": construct, "line": line })));
        }
        for module in module_refs(language, &stripped) {
            self.check_module(language, &module)?;
        }
        Ok(())
    }

    fn check_module(&self, language: GuestLanguage, module: &ModuleRef) -> Result<(), SandboxViolation> {
        let dynamic = match language {
            GuestLanguage::Python => PYTHON_DYNAMIC_MODULES,
            GuestLanguage::JavaScript => JS_DYNAMIC_MODULES,
        };
        if dynamic.contains(&module.name.as_str()) {
            return Err(SandboxViolation::new(
                ViolationKind::DynamicCode,
                format!("module '{}' evaluates code at run time (line {})", module.name, module.line),
            )
            .with_details(json!({ "module": module.name, "line": module.line })));
        }
        if let Some(category) = category_of(language, &module.name) {
            if !self.policy.allows(category) {
                return Err(SandboxViolation::new(
                    ViolationKind::RestrictedModule,
                    format!(
                        "module '{}' requires the {} capability, which is disabled (line {})",
                        module.name,
                        category.as_str(),
                        module.line
                    ),
                )
                .with_details(json!({
                    "module": module.name,
                    "category": category.as_str(),
                    "line": module.line,
                })));
            }
        }
        if !self.policy.allowed_modules.is_empty()
            && !self.policy.allowed_modules.iter().any(|m| *m == module.name)
        {
            return Err(SandboxViolation::new(
                ViolationKind::UnauthorizedModule,
                format!("module '{}' is not in the allowed module list (line {})", module.name, module.line),
            )
            .with_details(json!({
                "module": module.name,
                "allowed": self.policy.allowed_modules,
                "line": module.line,
            })));
        }
        Ok(())
    }
}

pub fn category_of(language: GuestLanguage, module: &str) -> Option<ModuleCategory> {
    let table = match language {
        GuestLanguage::Python => PYTHON_DENIED,
        GuestLanguage::JavaScript => JS_DENIED,
    };
    table.iter().find(|(name, _)| *name == module).map(|(_, category)| *category)
}

/// Every statically visible module reference, in source order.
pub fn module_refs(language: GuestLanguage, source: &str) -> Vec<ModuleRef> {
    let mut refs = Vec::new();
    for (index, line) in source.lines().enumerate() {
        let line_no = index + 1;
        match language {
            GuestLanguage::Python => python_modules(line, line_no, &mut refs),
            GuestLanguage::JavaScript => js_modules(line, line_no, &mut refs),
        }
    }
    refs
}

fn python_modules(line: &str, line_no: usize, out: &mut Vec<ModuleRef>) {
    static IMPORT: OnceLock<Regex> = OnceLock::new();
    static FROM: OnceLock<Regex> = OnceLock::new();
    static DUNDER: OnceLock<Regex> = OnceLock::new();
    let import = IMPORT.get_or_init(|| Regex::new(r"^\s*import\s+(.+)$").expect("valid regex"));
    let from = FROM.get_or_init(|| Regex::new(r"^\s*from\s+([A-Za-z_][\w.]*)\s+import\b").expect("valid regex"));
    let dunder = DUNDER.get_or_init(|| {
        Regex::new(r#"__import__\s*\(\s*['"]([\w.]+)['"]"#).expect("valid regex")
    });

    // `import a, b.c as d; x = 1` on one logical line.
    for statement in line.split(';') {
        if let Some(caps) = import.captures(statement) {
            for part in caps[1].split(',') {
                if let Some(name) = part.split_whitespace().next() {
                    push_top_level(name, '.', line_no, out);
                }
            }
        } else if let Some(caps) = from.captures(statement) {
            push_top_level(&caps[1], '.', line_no, out);
        }
    }
    for caps in dunder.captures_iter(line) {
        push_top_level(&caps[1], '.', line_no, out);
    }
}

fn js_modules(line: &str, line_no: usize, out: &mut Vec<ModuleRef>) {
    static REQUIRE: OnceLock<Regex> = OnceLock::new();
    static IMPORT: OnceLock<Regex> = OnceLock::new();
    let require = REQUIRE.get_or_init(|| {
        Regex::new(r#"(?:\brequire|\bimport)\s*\(\s*['"`]([^'"`]+)['"`]\s*\)"#).expect("valid regex")
    });
    let import = IMPORT.get_or_init(|| {
        Regex::new(r#"^\s*(?:import|export)\b[^'"`]*?(?:\bfrom\s+)?['"]([^'"]+)['"]"#).expect("valid regex")
    });
    for caps in require.captures_iter(line) {
        push_js(&caps[1], line_no, out);
    }
    if let Some(caps) = import.captures(line) {
        push_js(&caps[1], line_no, out);
    }
}

fn push_js(specifier: &str, line_no: usize, out: &mut Vec<ModuleRef>) {
    let specifier = specifier.strip_prefix("node:").unwrap_or(specifier);
    if specifier.starts_with('.') || specifier.starts_with('/') {
        return;
    }
    // `fs/promises` is a distinct builtin; other paths name the package.
    let name = if specifier == "fs/promises" {
        specifier.to_string()
    } else if let Some(scoped) = specifier.strip_prefix('@') {
        let mut parts = scoped.splitn(3, '/');
        match (parts.next(), parts.next()) {
            (Some(scope), Some(pkg)) => format!("@{}/{}", scope, pkg),
            _ => specifier.to_string(),
        }
    } else {
        specifier.split('/').next().unwrap_or(specifier).to_string()
    };
    out.push(ModuleRef { name, line: line_no });
}

fn push_top_level(name: &str, separator: char, line_no: usize, out: &mut Vec<ModuleRef>) {
    let top = name.split(separator).next().unwrap_or(name).trim();
    if !top.is_empty() {
        out.push(ModuleRef {
            name: top.to_string(),
            line: line_no,
        });
    }
}

fn find_dynamic_code(language: GuestLanguage, source: &str) -> Option<(String, usize)> {
    static PYTHON: OnceLock<Regex> = OnceLock::new();
    static JS: OnceLock<Regex> = OnceLock::new();
    static PY_DUNDER: OnceLock<Regex> = OnceLock::new();
    static PY_INTROSPECT: OnceLock<Regex> = OnceLock::new();
    let patterns: Vec<&Regex> = match language {
        GuestLanguage::Python => vec![
            PYTHON.get_or_init(|| {
                Regex::new(r"(?:^|[^.\w])(eval|exec|compile)\s*\(").expect("valid regex")
            }),
            // `__import__(name)` with a computed name.
            PY_DUNDER.get_or_init(|| {
                Regex::new(r#"(__import__)\s*\(\s*[^'"\s)]"#).expect("valid regex")
            }),
            // Walks from any object back to builtins and loaded modules.
            PY_INTROSPECT.get_or_init(|| {
                Regex::new(r"(__builtins__|__subclasses__|__globals__|__loader__)").expect("valid regex")
            }),
        ],
        GuestLanguage::JavaScript => vec![JS.get_or_init(|| {
            Regex::new(concat!(
                r"(?:^|[^.\w$])(eval\s*\(|new\s+Function\b|Function\s*\(|setTimeout\s*\(\s*['`]|setInterval\s*\(\s*['`]",
                r"|process\s*\.\s*(?:binding|_linkedBinding|dlopen)\b)"
            ))
            .expect("valid regex")
        })],
    };
    let mut offset = 0;
    for (index, line) in source.lines().enumerate() {
        for pattern in &patterns {
            if let Some(caps) = pattern.captures(line) {
                let construct = caps[1].split(|c: char| c == '(' || c.is_whitespace()).next().unwrap_or_default();
                let construct = if construct == "new" { "new Function" } else { construct };
                return Some((construct.to_string(), index + 1));
            }
        }
        if language == GuestLanguage::JavaScript {
            if let Some(construct) = computed_specifier(&source[offset..], line.len()) {
                return Some((construct, index + 1));
            }
        }
        offset += line.len() + 1;
    }
    None
}

/// A `require(...)`/`import(...)` on the first `line_len` bytes of `rest`
/// whose argument is anything but a single string literal.
fn computed_specifier(rest: &str, line_len: usize) -> Option<String> {
    static CALL: OnceLock<Regex> = OnceLock::new();
    static LITERAL: OnceLock<Regex> = OnceLock::new();
    let call = CALL.get_or_init(|| Regex::new(r"(?:^|[^\w$])(require|import)\s*\(").expect("valid regex"));
    let literal = LITERAL.get_or_init(|| {
        Regex::new(r#"^\s*(?:'[^'\\\n]*'|"[^"\\\n]*"|`[^`\\$]*`)\s*\)"#).expect("valid regex")
    });
    for caps in call.captures_iter(&rest[..line_len]) {
        let Some(whole) = caps.get(0) else { continue };
        if !literal.is_match(&rest[whole.end()..]) {
            return Some(format!("{}()", &caps[1]));
        }
    }
    None
}

/// Blank out comments, keeping line numbers. String contents are left alone.
fn strip_comments(language: GuestLanguage, source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut in_block = false;
    let mut py_open = None;
    for line in source.lines() {
        let kept = match language {
            GuestLanguage::Python => {
                let (code, still_open) = python_code_part(line, py_open);
                py_open = still_open;
                code
            }
            GuestLanguage::JavaScript => {
                let (code, still_open) = js_code_part(line, in_block);
                in_block = still_open;
                code
            }
        };
        out.push_str(&kept);
        out.push('\n');
    }
    out
}

/// An open Python string literal: its quote character and whether it is triple-quoted.
type PyQuote = (char, bool);

fn python_code_part(line: &str, mut open: Option<PyQuote>) -> (String, Option<PyQuote>) {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match open {
            Some((q, triple)) => {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                if c == q {
                    if !triple {
                        open = None;
                    } else if chars.get(i + 1) == Some(&q) && chars.get(i + 2) == Some(&q) {
                        open = None;
                        i += 3;
                        continue;
                    }
                }
            }
            None => {
                if c == '#' {
                    return (chars[..i].iter().collect(), None);
                }
                if c == '\'' || c == '"' {
                    let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
                    open = Some((c, triple));
                    if triple {
                        i += 3;
                        continue;
                    }
                }
            }
        }
        i += 1;
    }
    // Only triple-quoted strings continue onto the next line.
    (line.to_string(), open.filter(|(_, triple)| *triple))
}

fn js_code_part(line: &str, mut in_block: bool) -> (String, bool) {
    let mut out = String::new();
    let mut quote: Option<char> = None;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        if in_block {
            if c == '*' && next == Some('/') {
                in_block = false;
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }
        match quote {
            Some(q) => {
                if c == '\\' {
                    out.push(c);
                    if let Some(n) = next {
                        out.push(n);
                    }
                    i += 2;
                    continue;
                }
                if c == q {
                    quote = None;
                }
            }
            None => {
                if c == '/' && next == Some('/') {
                    break;
                }
                if c == '/' && next == Some('*') {
                    in_block = true;
                    i += 2;
                    continue;
                }
                if matches!(c, '\'' | '"' | '`') {
                    quote = Some(c);
                }
            }
        }
        out.push(c);
        i += 1;
    }
    (out, in_block)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> CapabilityGuard {
        CapabilityGuard::new(SecurityPolicy::default())
    }

    fn kind(result: Result<(), SandboxViolation>) -> Option<ViolationKind> {
        result.err().map(|v| v.kind)
    }

    #[test]
    fn test_python_import_forms() {
        let src = "import pandas as pd, numpy\nfrom os.path import join\nx = __import__('json')\nimport a; import b.c\n";
        let names: Vec<String> = module_refs(GuestLanguage::Python, src).into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["pandas", "numpy", "os", "json", "a", "b"]);
    }

    #[test]
    fn test_js_import_forms() {
        let src = r#"const fs = require('node:fs');
import { join } from "path";
import "./local.js";
const p = await import('fs/promises');
import pkg from '@scope/pkg/sub';
"#;
        let names: Vec<String> = module_refs(GuestLanguage::JavaScript, src).into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["fs", "path", "fs/promises", "@scope/pkg"]);
    }

    #[test]
    fn test_denied_category_is_restricted() {
        let v = guard().check(GuestLanguage::Python, "import subprocess\n").unwrap_err();
        assert_eq!(v.kind, ViolationKind::RestrictedModule);
        assert_eq!(v.details["category"], "subprocess");
        assert_eq!(
            kind(guard().check(GuestLanguage::JavaScript, "const cp = require('child_process');")),
            Some(ViolationKind::RestrictedModule)
        );
    }

    #[test]
    fn test_enabled_category_passes() {
        let policy = SecurityPolicy {
            enable_network: true,
            ..Default::default()
        };
        let guard = CapabilityGuard::new(policy);
        assert!(guard.check(GuestLanguage::Python, "import requests\nimport socket\n").is_ok());
        assert_eq!(
            kind(guard.check(GuestLanguage::Python, "import shutil\n")),
            Some(ViolationKind::RestrictedModule)
        );
    }

    #[test]
    fn test_allow_list_narrows() {
        let policy = SecurityPolicy {
            allowed_modules: vec!["pandas".into(), "numpy".into()],
            ..Default::default()
        };
        let guard = CapabilityGuard::new(policy);
        assert!(guard.check(GuestLanguage::Python, "import pandas\nfrom numpy import mean\n").is_ok());
        let v = guard.check(GuestLanguage::Python, "import scipy\n").unwrap_err();
        assert_eq!(v.kind, ViolationKind::UnauthorizedModule);
        assert_eq!(v.details["module"], "scipy");
    }

    #[test]
    fn test_dynamic_code_is_always_rejected() {
        let all = SecurityPolicy {
            enable_file_system: true,
            enable_network: true,
            enable_process: true,
            enable_subprocess: true,
            ..Default::default()
        };
        let guard = CapabilityGuard::new(all);
        for src in [
            "eval('1+1')",
            "exec(code)",
            "x = compile(src, 'f', 'exec')",
            "m = __import__(name)",
            "b = __builtins__",
            "object.__subclasses__()",
        ] {
            assert_eq!(kind(guard.check(GuestLanguage::Python, src)), Some(ViolationKind::DynamicCode), "{}", src);
        }
        for src in [
            "eval('1')",
            "const f = new Function('a', 'return a');",
            "Function('return 1')()",
            "require('vm')",
            "import(name)",
            "const cp = require('child_' + 'process');",
            "const m = await import(`${base}/x`);",
            "process.mainModule.require(name)",
            "process.binding('spawn_sync')",
        ] {
            assert_eq!(kind(guard.check(GuestLanguage::JavaScript, src)), Some(ViolationKind::DynamicCode), "{}", src);
        }
    }

    #[test]
    fn test_string_escapes_do_not_open_comments() {
        let cases = [
            r"s = 'a\'#'; import subprocess",
            r#"s = "a\"#"; import subprocess"#,
            "doc = \"\"\"\nheader # not a comment\n\"\"\"; import subprocess\n",
            "doc = '''it's # still text'''; import subprocess\n",
        ];
        for src in cases {
            assert_eq!(kind(guard().check(GuestLanguage::Python, src)), Some(ViolationKind::RestrictedModule), "{}", src);
        }
    }

    #[test]
    fn test_literal_specifiers_are_not_dynamic() {
        let js = "const a = require( 'lodash' );\nconst b = await import(\"./local.js\");\n";
        assert!(guard().check(GuestLanguage::JavaScript, js).is_ok());
    }

    #[test]
    fn test_try_wrapper_does_not_hide_violation() {
        let src = "try:\n    import socket\nexcept ImportError:\n    pass\n";
        let v = guard().check(GuestLanguage::Python, src).unwrap_err();
        assert_eq!(v.kind, ViolationKind::RestrictedModule);
        assert_eq!(v.details["line"], 2);
    }

    #[test]
    fn test_lookalikes_are_not_flagged() {
        let py = "import re\npattern = re.compile(r'\\d+')\nmodel.eval()\nretrieval(x)\n# eval(x) in a comment\ns = 'import os # not code'\n";
        assert!(guard().check(GuestLanguage::Python, py).is_ok());
        let js = "const r = obj.eval(1);\n// require('fs')\n/* new Function() */\nconst s = \"a // b\";\n";
        assert!(guard().check(GuestLanguage::JavaScript, js).is_ok());
    }
}
