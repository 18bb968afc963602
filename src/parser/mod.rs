pub mod lexer;
mod tree_builder;

pub use lexer::{lex, Pos, Tok, TokKind};
pub use tree_builder::{parse, ExtendsDecl, ParsedTemplate, ReplaceSlot, SlotKind};
