//! C++ module writer.
//!
//! Renders the lowered module as a header-style source file: preamble and
//! includes, a namespace named after the template stem, the optional
//! `External` aggregate, a `mixins` sub-namespace, and the `render` entry
//! point streaming `ss << …` chains.

use super::translator::{Emit, Mixin, Module};

const INDENT: &str = "    ";

pub fn write_module(module: &Module, name: &str) -> String {
    let name = sanitize_identifier(name);
    let mut out = String::new();

    out.push_str("// Generated by atc\n#pragma once\n\n#include <sstream>\n#include <string>\n");
    for include in &module.includes {
        out.push_str(include);
        out.push('\n');
    }
    out.push('\n');

    out.push_str("namespace atc\n{\n");
    out.push_str(INDENT);
    out.push_str("namespace ");
    out.push_str(&name);
    out.push('\n');
    out.push_str(INDENT);
    out.push_str("{\n");

    if let Some(external) = &module.external {
        if external.is_struct {
            push_line(&mut out, 2, "struct External");
            push_line(&mut out, 2, "{");
            for decl in &external.decls {
                push_line(&mut out, 3, decl);
            }
            push_line(&mut out, 2, "};");
            out.push('\n');
        }
    }

    if !module.mixins.is_empty() {
        push_line(&mut out, 2, "namespace mixins");
        push_line(&mut out, 2, "{");
        for mixin in &module.mixins {
            write_mixin_signature(&mut out, mixin);
            out.push_str(";\n");
        }
        out.push('\n');
        for mixin in &module.mixins {
            write_mixin_signature(&mut out, mixin);
            out.push('\n');
            push_line(&mut out, 3, "{");
            write_emits(&mut out, &mixin.body, "ss", &INDENT.repeat(4), &module.mixins);
            push_line(&mut out, 3, "}");
        }
        push_line(&mut out, 2, "}");
        out.push('\n');
    }

    out.push_str(&INDENT.repeat(2));
    out.push_str("inline std::string render(");
    match &module.external {
        Some(external) if external.is_struct => out.push_str("const External& external"),
        Some(external) => {
            for (i, decl) in external.decls.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(decl);
            }
        }
        None => {}
    }
    out.push_str(")\n");
    push_line(&mut out, 2, "{");
    push_line(&mut out, 3, "std::ostringstream ss;");
    write_emits(&mut out, &module.body, "ss", &INDENT.repeat(3), &module.mixins);
    push_line(&mut out, 3, "return ss.str();");
    push_line(&mut out, 2, "}");
    push_line(&mut out, 1, "}");
    out.push_str("}\n");
    out
}

fn push_line(out: &mut String, depth: usize, line: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(line);
    out.push('\n');
}

fn write_mixin_signature(out: &mut String, mixin: &Mixin) {
    if mixin.has_block {
        out.push_str(&INDENT.repeat(3));
        out.push_str("template <class Block>\n");
    }
    out.push_str(&INDENT.repeat(3));
    out.push_str("inline void ");
    out.push_str(&mixin.name);
    out.push_str("(std::ostringstream& ss");
    if mixin.has_block {
        out.push_str(", Block&& block");
    }
    for arg in &mixin.args {
        out.push_str(", ");
        out.push_str(arg);
    }
    out.push(')');
}

/// Escape a literal for a C++ double-quoted string.
fn escape_cxx_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

/// Stream-chain writer. Consecutive literals coalesce into one string in
/// a single `stream << …` chain; code fragments and mixin calls break the
/// chain.
struct ChainWriter<'a> {
    out: &'a mut String,
    stream: &'a str,
    indent: &'a str,
    open: bool,
    first: bool,
    pending: String,
}

impl ChainWriter<'_> {
    fn start_chain(&mut self) {
        if !self.open {
            self.out.push_str(self.indent);
            self.out.push_str(self.stream);
            self.out.push_str(" << ");
            self.open = true;
            self.first = true;
        }
    }

    fn end_chain(&mut self) {
        if self.open {
            self.out.push_str(";\n");
            self.open = false;
            self.first = false;
        }
    }

    fn push_text(&mut self, lit: &str) {
        self.start_chain();
        if !self.first {
            self.out.push_str(" << ");
        }
        self.out.push('"');
        self.out.push_str(&escape_cxx_string(lit));
        self.out.push('"');
        self.first = false;
    }

    fn push_expr(&mut self, expr: &str) {
        self.start_chain();
        if !self.first {
            self.out.push_str(" << ");
        }
        self.out.push_str(expr);
        self.first = false;
    }

    fn flush_pending(&mut self) {
        if !self.pending.is_empty() {
            let text = std::mem::take(&mut self.pending);
            self.push_text(&text);
        }
    }
}

fn write_emits(out: &mut String, nodes: &[Emit], stream: &str, indent: &str, mixins: &[Mixin]) {
    let mut w = ChainWriter {
        out,
        stream,
        indent,
        open: false,
        first: false,
        pending: String::new(),
    };

    for node in nodes {
        match node {
            Emit::Text(text) => w.pending.push_str(text),
            Emit::Expr(expr) => {
                w.flush_pending();
                w.push_expr(expr);
            }
            Emit::Code { code, body } => {
                w.flush_pending();
                w.end_chain();
                w.out.push_str(indent);
                w.out.push_str(code);
                w.out.push('\n');
                if !body.is_empty() {
                    w.out.push_str(indent);
                    w.out.push_str("{\n");
                    let inner = format!("{}{}", indent, INDENT);
                    write_emits(w.out, body, stream, &inner, mixins);
                    w.out.push_str(indent);
                    w.out.push_str("}\n");
                }
            }
            Emit::BlockCall => {
                w.flush_pending();
                w.end_chain();
                w.out.push_str(indent);
                w.out.push_str("std::forward<Block>(block)(ss);\n");
            }
            Emit::MixinCall { name, args, body } => {
                let Some(decl) = mixins.iter().find(|m| &m.name == name) else {
                    log::warn!("mixin [{}] was not declared", name);
                    continue;
                };
                w.flush_pending();
                w.end_chain();
                w.out.push_str(indent);
                w.out.push_str("mixins::");
                w.out.push_str(name);
                w.out.push_str("(ss");
                if decl.has_block {
                    if body.is_empty() {
                        w.out.push_str(", [](std::ostringstream&) {}");
                    } else {
                        w.out.push_str(", [&](std::ostringstream& __blk_ss) {\n");
                        let inner = format!("{}{}", indent, INDENT);
                        write_emits(w.out, body, "__blk_ss", &inner, mixins);
                        w.out.push_str(indent);
                        w.out.push('}');
                    }
                }
                for arg in args {
                    w.out.push_str(", ");
                    w.out.push_str(arg);
                }
                w.out.push_str(");\n");
            }
        }
    }

    w.flush_pending();
    w.end_chain();
}

/// Make a file stem usable as a C++ namespace name.
fn sanitize_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if i == 0 && c.is_ascii_digit() {
                out.push('_');
            }
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push_str("template_");
    }
    out
}
