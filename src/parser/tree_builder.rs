//! Builds an AST from the indent-aware token stream.
//!
//! Besides the tree itself, the parser records a *replace map*: for every
//! named block, include, and mixin declaration, the path to its parent
//! node plus its offset among the siblings. The linker patches those sites
//! later and keeps the map consistent across splices.

use std::collections::HashMap;
use std::path::Path;

use super::lexer::{lex, Pos, Tok, TokKind};
use crate::ast::*;
use crate::error::{ErrorKind, ParseError};

/// What a replace-map entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Include,
    Block,
    Mixin,
}

/// Location of a patch site: path from the root to the parent node (empty
/// for the root list) plus the child offset. The linker reindexes every
/// affected slot after each splice, so `parent.children[offset]` names the
/// live node at all times between mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceSlot {
    pub kind: SlotKind,
    pub parent: Vec<usize>,
    pub offset: usize,
}

/// File-level `extends` reference.
#[derive(Debug, Clone)]
pub struct ExtendsDecl {
    pub path: String,
    pub pos: Pos,
}

/// Parse result for one template source.
#[derive(Debug)]
pub struct ParsedTemplate {
    pub ast: NodeList,
    pub replace_map: HashMap<String, ReplaceSlot>,
    pub extends: Option<ExtendsDecl>,
}

/// Lex and parse a template source.
pub fn parse(source: &str) -> Result<ParsedTemplate, ParseError> {
    let toks = lex(source)?;
    TreeBuilder::new(toks).build()
}

struct TreeBuilder<'a> {
    toks: Vec<Tok<'a>>,
    pos: usize,
    /// Path from the root to the node whose children are being parsed.
    path: Vec<usize>,
    replace_map: HashMap<String, ReplaceSlot>,
    extends: Option<ExtendsDecl>,
}

impl<'a> TreeBuilder<'a> {
    fn new(toks: Vec<Tok<'a>>) -> Self {
        Self {
            toks,
            pos: 0,
            path: Vec::new(),
            replace_map: HashMap::new(),
            extends: None,
        }
    }

    fn cur(&self) -> &Tok<'a> {
        &self.toks[self.pos]
    }

    fn at(&self, kind: TokKind) -> bool {
        self.cur().kind == kind
    }

    fn advance(&mut self) {
        if self.cur().kind != TokKind::Eof {
            self.pos += 1;
        }
    }

    fn build(mut self) -> Result<ParsedTemplate, ParseError> {
        let mut ast = NodeList::new();
        loop {
            match self.cur().kind {
                TokKind::Eof => break,
                TokKind::Blank => self.advance(),
                TokKind::Indent | TokKind::Dedent => {
                    let t = self.cur();
                    let (kind, what) = if t.kind == TokKind::Indent {
                        (ErrorKind::UnexpectedIndent, "indent")
                    } else {
                        (ErrorKind::UnexpectedDedent, "dedent")
                    };
                    return Err(ParseError::new(
                        kind,
                        format!("unexpected {} at top level", what),
                        t.pos,
                    ));
                }
                TokKind::Line => {
                    if self.cur().level != 0 {
                        return Err(ParseError::new(
                            ErrorKind::LeadingIndent,
                            "leading indentation before the first content line",
                            self.cur().pos,
                        ));
                    }
                    let index = ast.len();
                    let node = self.parse_line(index, false)?;
                    ast.push(node);
                }
            }
        }
        Ok(ParsedTemplate {
            ast,
            replace_map: self.replace_map,
            extends: self.extends,
        })
    }

    fn register(&mut self, key: String, kind: SlotKind, offset: usize) {
        // keys are unique per template; the first registration wins
        self.replace_map.entry(key).or_insert(ReplaceSlot {
            kind,
            parent: self.path.clone(),
            offset,
        });
    }

    /// Parse one LINE token into a node. `index` is the node's position
    /// among its future siblings; `anonymous_allowed` is true inside mixin
    /// bodies, where a bare `block` names the callback slot.
    fn parse_line(&mut self, index: usize, anonymous_allowed: bool) -> Result<Node, ParseError> {
        let tok = self.cur().clone();
        let s = tok.text.trim_start();
        let pos = tok.pos;

        if let Some(rest) = s.strip_prefix("extends ") {
            let path = rest.trim().to_string();
            self.extends = Some(ExtendsDecl {
                path: path.clone(),
                pos,
            });
            self.advance();
            return Ok(Node::Extends(ExtendsNode { path, pos }));
        }

        if s == "block" || s.starts_with("block ") {
            return self.parse_block(s, pos, index, anonymous_allowed);
        }

        if let Some(rest) = s.strip_prefix("append ") {
            return self.parse_named_block(rest.trim(), BlockMode::Append, pos, index, anonymous_allowed);
        }
        if let Some(rest) = s.strip_prefix("prepend ") {
            return self.parse_named_block(rest.trim(), BlockMode::Prepend, pos, index, anonymous_allowed);
        }

        if let Some(rest) = s.strip_prefix("mixin ") {
            let rest = rest.trim_start();
            let Some((name, used)) = scan_ident(rest) else {
                return Err(ParseError::new(
                    ErrorKind::MalformedMixin,
                    "mixin name expected",
                    pos,
                ));
            };
            let args = mixin_arg_list(&rest[used..], pos)?;
            self.advance();
            let mut node = MixinDeclNode {
                name: name.to_string(),
                args,
                children: NodeList::new(),
                pos,
            };
            self.register(node.name.clone(), SlotKind::Mixin, index);
            self.parse_children(&mut node.children, index, true, "mixin body")?;
            return Ok(Node::MixinDecl(node));
        }

        if let Some(rest) = s.strip_prefix('+') {
            let Some((name, used)) = scan_ident(rest) else {
                return Err(ParseError::new(
                    ErrorKind::MalformedMixin,
                    "mixin call name expected",
                    pos,
                ));
            };
            let tail = rest[used..].trim();
            let args = if tail.is_empty() {
                Vec::new()
            } else {
                mixin_arg_list(tail, pos)?
            };
            self.advance();
            let mut node = MixinCallNode {
                name: name.to_string(),
                args,
                children: NodeList::new(),
                pos,
            };
            self.parse_children(&mut node.children, index, anonymous_allowed, "mixin call body")?;
            return Ok(Node::MixinCall(node));
        }

        if let Some(rest) = s.strip_prefix("- ") {
            self.advance();
            let mut node = CodeNode {
                code: rest.to_string(),
                children: NodeList::new(),
                pos,
            };
            self.parse_children(&mut node.children, index, anonymous_allowed, "code block")?;
            return Ok(Node::Code(node));
        }

        if let Some(rest) = s.strip_prefix("= ") {
            self.advance();
            return Ok(Node::Expr(ExprNode {
                expr: rest.to_string(),
                pos,
            }));
        }

        if let Some(rest) = s.strip_prefix('|') {
            self.advance();
            return Ok(Node::Text(TextNode {
                text: rest.trim_start().to_string(),
                pos,
            }));
        }

        if s == "." {
            self.advance();
            if !self.at(TokKind::Indent) {
                return Err(ParseError::new(
                    ErrorKind::MissingIndent,
                    "expected indented text after '.'",
                    self.cur().pos,
                ));
            }
            self.advance();
            let mut group = self.collect_text_nodes();
            if !self.at(TokKind::Dedent) {
                return Err(ParseError::new(
                    ErrorKind::MissingDedent,
                    "expected dedent after text block",
                    self.cur().pos,
                ));
            }
            self.advance();
            group.pos = pos;
            return Ok(Node::TextGroup(group));
        }

        if let Some(rest) = s.strip_prefix("include ") {
            let path = rest.trim().to_string();
            let mode = if Path::new(&path).extension().is_some_and(|e| e == "at") {
                IncludeMode::Template
            } else {
                IncludeMode::Plain
            };
            self.register(path.clone(), SlotKind::Include, index);
            self.advance();
            return Ok(Node::Include(IncludeNode { path, mode, pos }));
        }

        if s == "external" || s == "external struct" {
            let is_struct = s.ends_with("struct");
            self.advance();
            let mut node = ExternalNode {
                is_struct,
                children: NodeList::new(),
                pos,
            };
            self.parse_children(&mut node.children, index, anonymous_allowed, "external declarations")?;
            return Ok(Node::External(node));
        }

        // anything else is an HTML element head; a trailing '.' marks a
        // literal text-block body
        let trimmed = s.trim_end();
        let text_block = trimmed.ends_with('.');
        let head = if text_block {
            trimmed[..trimmed.len() - 1].to_string()
        } else {
            trimmed.to_string()
        };
        self.advance();
        let mut node = HtmlNode {
            head,
            children: NodeList::new(),
            pos,
        };
        if self.at(TokKind::Indent) {
            if text_block {
                self.advance();
                let group = self.collect_text_nodes();
                node.children.push(Node::TextGroup(group));
                if !self.at(TokKind::Dedent) {
                    return Err(ParseError::new(
                        ErrorKind::MissingDedent,
                        "expected dedent after text block",
                        self.cur().pos,
                    ));
                }
                self.advance();
            } else {
                self.parse_children(&mut node.children, index, anonymous_allowed, "element body")?;
            }
        }
        Ok(Node::Html(node))
    }

    fn parse_block(
        &mut self,
        s: &str,
        pos: Pos,
        index: usize,
        anonymous_allowed: bool,
    ) -> Result<Node, ParseError> {
        let rest = s.strip_prefix("block").unwrap_or_default().trim();
        if rest.is_empty() {
            // anonymous block: the mixin callback slot
            if !anonymous_allowed {
                return Err(ParseError::new(
                    ErrorKind::AnonymousBlock,
                    "anonymous block is only allowed inside a mixin body",
                    pos,
                )
                .with_help("give the block a name, or move it into a mixin"));
            }
            self.advance();
            let mut node = BlockNode {
                name: String::new(),
                mode: BlockMode::Replace,
                children: NodeList::new(),
                pos,
            };
            self.parse_children(&mut node.children, index, anonymous_allowed, "block body")?;
            return Ok(Node::Block(node));
        }
        let (mode, name) = if let Some(n) = rest.strip_prefix("append ") {
            (BlockMode::Append, n.trim())
        } else if let Some(n) = rest.strip_prefix("prepend ") {
            (BlockMode::Prepend, n.trim())
        } else {
            (BlockMode::Replace, rest)
        };
        self.parse_named_block(name, mode, pos, index, anonymous_allowed)
    }

    fn parse_named_block(
        &mut self,
        name: &str,
        mode: BlockMode,
        pos: Pos,
        index: usize,
        anonymous_allowed: bool,
    ) -> Result<Node, ParseError> {
        self.advance();
        let mut node = BlockNode {
            name: name.to_string(),
            mode,
            children: NodeList::new(),
            pos,
        };
        self.register(node.name.clone(), SlotKind::Block, index);
        self.parse_children(&mut node.children, index, anonymous_allowed, "block body")?;
        Ok(Node::Block(node))
    }

    /// Parse an INDENT-delimited child list. `self_index` is the owning
    /// node's position among its own siblings.
    fn parse_children(
        &mut self,
        children: &mut NodeList,
        self_index: usize,
        anonymous_allowed: bool,
        what: &str,
    ) -> Result<(), ParseError> {
        if !self.at(TokKind::Indent) {
            return Ok(());
        }
        self.advance();
        self.path.push(self_index);
        let result = (|| {
            while matches!(self.cur().kind, TokKind::Line | TokKind::Blank) {
                if self.at(TokKind::Blank) {
                    self.advance();
                    continue;
                }
                let index = children.len();
                let node = self.parse_line(index, anonymous_allowed)?;
                children.push(node);
            }
            Ok(())
        })();
        self.path.pop();
        result?;
        if !self.at(TokKind::Dedent) {
            return Err(ParseError::new(
                ErrorKind::MissingDedent,
                format!("expected dedent after {}", what),
                self.cur().pos,
            ));
        }
        self.advance();
        Ok(())
    }

    /// Collect the verbatim lines of a text block. Deeper indentation
    /// inside the block is preserved relative to the first line's column.
    fn collect_text_nodes(&mut self) -> TextGroupNode {
        let mut group = TextGroupNode {
            lines: Vec::new(),
            pos: self.cur().pos,
        };
        let mut base_col: Option<u32> = None;
        let mut depth = 0usize;
        loop {
            match self.cur().kind {
                TokKind::Line => {
                    let t = self.cur();
                    let base = *base_col.get_or_insert(t.pos.col);
                    let pad = t.pos.col.saturating_sub(base) as usize;
                    let mut text = " ".repeat(pad);
                    text.push_str(&t.text);
                    group.lines.push(TextNode { text, pos: t.pos });
                    self.advance();
                }
                TokKind::Blank => {
                    group.lines.push(TextNode {
                        text: String::new(),
                        pos: self.cur().pos,
                    });
                    self.advance();
                }
                TokKind::Indent => {
                    depth += 1;
                    self.advance();
                }
                TokKind::Dedent if depth > 0 => {
                    depth -= 1;
                    self.advance();
                }
                _ => break,
            }
        }
        group
    }
}

fn scan_ident(s: &str) -> Option<(&str, usize)> {
    let b = s.as_bytes();
    if b.is_empty() || !(b[0].is_ascii_alphabetic() || b[0] == b'_') {
        return None;
    }
    let mut q = 1;
    while q < b.len() && (b[q].is_ascii_alphanumeric() || b[q] == b'_' || b[q] == b'-') {
        q += 1;
    }
    Some((&s[..q], q))
}

/// Extract the argument list of a mixin header. `rest` begins right after
/// the mixin name and must open with `(` and close with a matching `)`.
fn mixin_arg_list(rest: &str, pos: Pos) -> Result<Vec<String>, ParseError> {
    let t = rest.trim();
    if !t.starts_with('(') {
        return Err(ParseError::new(
            ErrorKind::MalformedMixin,
            "expected '(' after mixin name",
            pos,
        )
        .with_help("declare arguments as name(a, b)"));
    }
    let b = t.as_bytes();
    let mut depth = 0i32;
    let mut quote = 0u8;
    let mut i = 0;
    while i < b.len() {
        let c = b[i];
        if quote != 0 {
            if c == b'\\' {
                i += 1;
            } else if c == quote {
                quote = 0;
            }
        } else {
            match c {
                b'\'' | b'"' => quote = c,
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(split_args(&t[1..i]));
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    Err(ParseError::new(
        ErrorKind::MalformedMixin,
        "missing ')' in mixin header",
        pos,
    ))
}

/// Split an argument list at top-level commas, respecting quotes and
/// nested brackets.
fn split_args(raw: &str) -> Vec<String> {
    let b = raw.as_bytes();
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut quote = 0u8;
    let mut start = 0usize;
    let mut i = 0;
    while i < b.len() {
        let c = b[i];
        if quote != 0 {
            if c == b'\\' {
                i += 1;
            } else if c == quote {
                quote = 0;
            }
        } else {
            match c {
                b'\'' | b'"' => quote = c,
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth -= 1,
                b',' if depth == 0 => {
                    let arg = raw[start..i].trim();
                    if !arg.is_empty() {
                        out.push(arg.to_string());
                    }
                    start = i + 1;
                }
                _ => {}
            }
        }
        i += 1;
    }
    let arg = raw[start..].trim();
    if !arg.is_empty() {
        out.push(arg.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> ParsedTemplate {
        parse(source).expect("template should parse")
    }

    #[test]
    fn dispatch_covers_the_directive_set() {
        let t = parse_ok(
            "extends layout.at\nblock content\ninclude part.at\nmixin m()\n+m()\n- int x = 0;\n= x\n| hi\np body\n",
        );
        let kinds: Vec<_> = t
            .ast
            .iter()
            .map(|n| match n {
                Node::Extends(_) => "extends",
                Node::Block(_) => "block",
                Node::Include(_) => "include",
                Node::MixinDecl(_) => "mixin",
                Node::MixinCall(_) => "call",
                Node::Code(_) => "code",
                Node::Expr(_) => "expr",
                Node::Text(_) => "text",
                Node::Html(_) => "html",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["extends", "block", "include", "mixin", "call", "code", "expr", "text", "html"]
        );
        assert!(t.extends.is_some());
    }

    #[test]
    fn children_nest_between_indent_and_dedent() {
        let t = parse_ok("ul\n  li One\n  li Two\n");
        let Node::Html(ul) = &t.ast[0] else { panic!() };
        assert_eq!(ul.children.len(), 2);
        let Node::Html(li) = &ul.children[0] else { panic!() };
        assert_eq!(li.head, "li One");
    }

    #[test]
    fn blank_lines_between_siblings_do_not_change_the_ast() {
        let with_blank = parse_ok("div\n  p one\n\n  p two\n");
        let without = parse_ok("div\n  p one\n  p two\n");
        let Node::Html(a) = &with_blank.ast[0] else { panic!() };
        let Node::Html(b) = &without.ast[0] else { panic!() };
        assert_eq!(a.children.len(), b.children.len());
    }

    #[test]
    fn replace_map_records_parent_path_and_offset() {
        let t = parse_ok("div\n  block head\nblock foot\n");
        let head = &t.replace_map["head"];
        assert_eq!(head.kind, SlotKind::Block);
        assert_eq!(head.parent, vec![0]);
        assert_eq!(head.offset, 0);
        let foot = &t.replace_map["foot"];
        assert_eq!(foot.parent, Vec::<usize>::new());
        assert_eq!(foot.offset, 1);
    }

    #[test]
    fn include_mode_follows_the_extension() {
        let t = parse_ok("include part.at\ninclude style.css\n");
        let Node::Include(at) = &t.ast[0] else { panic!() };
        assert_eq!(at.mode, IncludeMode::Template);
        let Node::Include(css) = &t.ast[1] else { panic!() };
        assert_eq!(css.mode, IncludeMode::Plain);
    }

    #[test]
    fn block_modes_parse_in_both_spellings() {
        let t = parse_ok("block append foot\nprepend head\n");
        let Node::Block(a) = &t.ast[0] else { panic!() };
        assert_eq!(a.mode, BlockMode::Append);
        assert_eq!(a.name, "foot");
        let Node::Block(p) = &t.ast[1] else { panic!() };
        assert_eq!(p.mode, BlockMode::Prepend);
        assert_eq!(p.name, "head");
    }

    #[test]
    fn anonymous_block_outside_mixin_is_an_error() {
        let err = parse("div\n  block\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::AnonymousBlock);
    }

    #[test]
    fn anonymous_block_inside_mixin_parses() {
        let t = parse_ok("mixin card()\n  div\n    block\n");
        let Node::MixinDecl(m) = &t.ast[0] else { panic!() };
        let Node::Html(div) = &m.children[0] else { panic!() };
        let Node::Block(b) = &div.children[0] else { panic!() };
        assert!(b.name.is_empty());
    }

    #[test]
    fn mixin_header_requires_parens() {
        let err = parse("mixin b\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedMixin);
        let err = parse("mixin b(x\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedMixin);
    }

    #[test]
    fn mixin_args_split_at_top_level_commas() {
        let t = parse_ok("mixin pair(const std::string& a, int b)\n");
        let Node::MixinDecl(m) = &t.ast[0] else { panic!() };
        assert_eq!(m.args, vec!["const std::string& a", "int b"]);
    }

    #[test]
    fn mixin_call_args_keep_quoted_commas_together() {
        let t = parse_ok("+pair(\"a,b\", f(1, 2))\n");
        let Node::MixinCall(c) = &t.ast[0] else { panic!() };
        assert_eq!(c.args, vec!["\"a,b\"", "f(1, 2)"]);
    }

    #[test]
    fn mixin_call_without_parens_has_no_args() {
        let t = parse_ok("+sep\n");
        let Node::MixinCall(c) = &t.ast[0] else { panic!() };
        assert!(c.args.is_empty());
    }

    #[test]
    fn text_block_reads_lines_verbatim() {
        let t = parse_ok("script.\n  var a = 1;\n    indented();\n  done();\n");
        let Node::Html(s) = &t.ast[0] else { panic!() };
        let Node::TextGroup(g) = &s.children[0] else { panic!() };
        let lines: Vec<_> = g.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(lines, vec!["var a = 1;", "  indented();", "done();"]);
        // the trailing '.' is stripped from the head
        assert_eq!(s.head, "script");
    }

    #[test]
    fn bare_dot_opens_a_text_group() {
        let t = parse_ok(".\n  one\n\n  two\n");
        let Node::TextGroup(g) = &t.ast[0] else { panic!() };
        let lines: Vec<_> = g.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(lines, vec!["one", "", "two"]);
    }

    #[test]
    fn expr_after_indent_without_children_is_a_missing_dedent() {
        let err = parse("div\n  = x\n    p deeper\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingDedent);
    }

    #[test]
    fn external_struct_marker_is_recognized() {
        let t = parse_ok("external struct\n  - std::string title;\nexternal\n  - int count\n");
        let Node::External(a) = &t.ast[0] else { panic!() };
        assert!(a.is_struct);
        let Node::External(b) = &t.ast[1] else { panic!() };
        assert!(!b.is_struct);
    }

    #[test]
    fn pipe_text_is_trimmed_left_only() {
        let t = parse_ok("| hello \n");
        let Node::Text(text) = &t.ast[0] else { panic!() };
        assert_eq!(text.text, "hello ");
    }

    #[test]
    fn parse_is_idempotent_for_include_free_templates() {
        let a = parse_ok("div\n  p one\n");
        let b = parse_ok("div\n  p one\n");
        assert_eq!(format!("{:?}", a.ast), format!("{:?}", b.ast));
    }
}
