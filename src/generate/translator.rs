//! Lowers a linked AST into a flat emission stream.
//!
//! Each HTML node's head is parsed to an IR chain and flattened into open
//! tags, interpolated expression segments, translated children, and close
//! tags in reverse chain order. `external` declarations, `#include` lines
//! and mixin declarations are pulled aside into the module tables.

use crate::ast::*;
use crate::error::ParseError;
use crate::head::{self, HeadIr, Segment, Value};
use crate::html;

/// One step of the flat emission stream fed to the writer.
#[derive(Debug, Clone)]
pub enum Emit {
    Text(String),
    Expr(String),
    Code { code: String, body: Vec<Emit> },
    MixinCall {
        name: String,
        args: Vec<String>,
        body: Vec<Emit>,
    },
    /// Invocation of the block callback inside a mixin body.
    BlockCall,
}

/// Lowered mixin, keyed into the module table by name.
#[derive(Debug, Clone)]
pub struct Mixin {
    pub name: String,
    pub args: Vec<String>,
    /// True when the body reaches an anonymous block; the emitter adds a
    /// block-callback parameter for such mixins.
    pub has_block: bool,
    pub body: Vec<Emit>,
}

/// External data visible to the template at render time.
#[derive(Debug, Clone)]
pub struct External {
    pub is_struct: bool,
    /// Struct member lines, or function-parameter declarations.
    pub decls: Vec<String>,
}

/// Lowered form of a linked template, ready for writing.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub includes: Vec<String>,
    pub external: Option<External>,
    pub mixins: Vec<Mixin>,
    pub body: Vec<Emit>,
}

#[derive(Default)]
pub struct Translator {
    includes: Vec<String>,
    mixins: Vec<Mixin>,
    external: Option<External>,
    doctype_done: bool,
}

impl Translator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn translate(mut self, ast: &NodeList) -> Result<Module, ParseError> {
        let mut body = Vec::new();
        self.lower_list(ast, &mut body)?;
        Ok(Module {
            includes: self.includes,
            external: self.external,
            mixins: self.mixins,
            body,
        })
    }

    /// Lower a node list, returning whether an anonymous block was
    /// reached.
    fn lower_list(&mut self, nodes: &NodeList, out: &mut Vec<Emit>) -> Result<bool, ParseError> {
        let mut block_used = false;
        for node in nodes {
            block_used |= self.lower_node(node, out)?;
        }
        Ok(block_used)
    }

    fn lower_node(&mut self, node: &Node, out: &mut Vec<Emit>) -> Result<bool, ParseError> {
        match node {
            Node::External(n) => {
                self.lower_external(n);
                Ok(false)
            }
            Node::Html(n) => self.lower_html(n, out),
            Node::Text(n) => {
                push_segments(out, &head::parse_segments_full(&n.text));
                Ok(false)
            }
            Node::TextGroup(n) => {
                let joined = n
                    .lines
                    .iter()
                    .map(|l| l.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                push_segments(out, &head::parse_segments_full(&joined));
                Ok(false)
            }
            Node::Code(n) => {
                let trimmed = n.code.trim_start();
                if trimmed.starts_with("#include") {
                    self.add_include(trimmed);
                    Ok(false)
                } else {
                    let mut body = Vec::new();
                    let used = self.lower_list(&n.children, &mut body)?;
                    out.push(Emit::Code {
                        code: n.code.clone(),
                        body,
                    });
                    Ok(used)
                }
            }
            Node::Expr(n) => {
                out.push(Emit::Expr(n.expr.clone()));
                Ok(false)
            }
            Node::MixinDecl(n) => {
                let mut body = Vec::new();
                let has_block = self.lower_list(&n.children, &mut body)?;
                if !self.mixins.iter().any(|m| m.name == n.name) {
                    self.mixins.push(Mixin {
                        name: n.name.clone(),
                        args: n.args.clone(),
                        has_block,
                        body,
                    });
                }
                Ok(false)
            }
            Node::MixinCall(n) => {
                let mut body = Vec::new();
                self.lower_list(&n.children, &mut body)?;
                out.push(Emit::MixinCall {
                    name: n.name.clone(),
                    args: n.args.clone(),
                    body,
                });
                Ok(false)
            }
            Node::Block(n) => {
                if n.name.is_empty() {
                    out.push(Emit::BlockCall);
                    Ok(true)
                } else {
                    // a named block that survived linking renders its own
                    // children in place
                    self.lower_list(&n.children, out)
                }
            }
            Node::Extends(_) | Node::Include(_) => Ok(false),
        }
    }

    fn lower_external(&mut self, node: &ExternalNode) {
        let mut external = External {
            is_struct: node.is_struct,
            decls: Vec::new(),
        };
        for child in &node.children {
            let Node::Code(code) = child else { continue };
            let trimmed = code.code.trim_start();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with("#include") {
                self.add_include(trimmed);
                continue;
            }
            if external.is_struct {
                external.decls.push(code.code.clone());
                continue;
            }
            let first = trimmed.as_bytes()[0];
            if first.is_ascii_alphabetic() || first == b'_' {
                let end = trimmed.rfind(';').unwrap_or(trimmed.len());
                external.decls.push(trimmed[..end].to_string());
            }
        }
        self.external = Some(external);
    }

    fn add_include(&mut self, line: &str) {
        if !self.includes.iter().any(|i| i == line) {
            self.includes.push(line.to_string());
        }
    }

    fn lower_html(&mut self, node: &HtmlNode, out: &mut Vec<Emit>) -> Result<bool, ParseError> {
        let ir = head::parse_head(&node.head, node.pos)?;

        // the first single-argument doctype element is the registered one
        if !self.doctype_done && ir.tag == "doctype" && ir.content.segs.len() == 1 {
            self.doctype_done = true;
            lower_doctype(out, &ir);
            return Ok(false);
        }

        emit_ir_chain(out, &ir);
        let used = self.lower_list(&node.children, out)?;

        let mut opened = Vec::with_capacity(4);
        let mut link = Some(&ir);
        while let Some(part) = link {
            opened.push(part.tag);
            link = part.next.as_deref();
        }
        for tag in opened.iter().rev() {
            if !html::is_void_tag(tag) {
                out.push(Emit::Text(format!("</{}>", tag)));
            }
        }
        Ok(used)
    }
}

fn lower_doctype(out: &mut Vec<Emit>, ir: &HeadIr<'_>) {
    if let [Segment::Literal(name)] = ir.content.segs.as_slice() {
        if let Some(canonical) = html::doctype_builtin(name.trim()) {
            out.push(Emit::Text(canonical.to_string()));
            return;
        }
    }
    out.push(Emit::Text("<!DOCTYPE ".to_string()));
    push_segments(out, &ir.content);
    out.push(Emit::Text(">".to_string()));
}

fn push_segments(out: &mut Vec<Emit>, value: &Value<'_>) {
    for seg in &value.segs {
        match seg {
            Segment::Literal(s) => out.push(Emit::Text((*s).to_string())),
            Segment::Expr(s) => out.push(Emit::Expr((*s).to_string())),
        }
    }
}

fn emit_ir_chain(out: &mut Vec<Emit>, ir: &HeadIr<'_>) {
    emit_open_tag(out, ir);
    if let Some(next) = &ir.next {
        emit_ir_chain(out, next);
    } else if !ir.content.is_empty() {
        push_segments(out, &ir.content);
    }
}

fn emit_open_tag(out: &mut Vec<Emit>, ir: &HeadIr<'_>) {
    let mut buf = String::new();
    buf.push('<');
    buf.push_str(ir.tag);

    if !ir.id.is_empty() {
        buf.push_str(" id=\"");
        emit_value(out, &mut buf, &ir.id);
        buf.push('"');
    }
    if !ir.classes.is_empty() {
        buf.push_str(" class=\"");
        for (i, class) in ir.classes.iter().enumerate() {
            emit_value(out, &mut buf, class);
            if i + 1 < ir.classes.len() {
                buf.push(' ');
            }
        }
        buf.push('"');
    }
    for attr in &ir.attrs {
        buf.push(' ');
        emit_value(out, &mut buf, &attr.name);
        if !attr.value.is_empty() {
            buf.push('=');
            emit_value(out, &mut buf, &attr.value);
        }
    }
    buf.push('>');
    flush_text(out, &mut buf);
}

/// Append a value's segments: literals run into the text buffer,
/// expressions flush it and emit as their own step.
fn emit_value(out: &mut Vec<Emit>, buf: &mut String, value: &Value<'_>) {
    for seg in &value.segs {
        match seg {
            Segment::Literal(s) => buf.push_str(s),
            Segment::Expr(s) => {
                flush_text(out, buf);
                out.push(Emit::Expr((*s).to_string()));
            }
        }
    }
}

fn flush_text(out: &mut Vec<Emit>, buf: &mut String) {
    if !buf.is_empty() {
        out.push(Emit::Text(std::mem::take(buf)));
    }
}
