// plc — Proc Legalization Compiler
//
// Library root. Front end (lexer, parser, resolve) builds the proc IR;
// analyses (token_order, exclusivity) feed channel legalization; the
// pass and pipeline layers sequence IR-to-IR passes; interp executes
// legalized packages for testing.

pub mod adapter;
pub mod ast;
pub mod dce;
pub mod diag;
pub mod dot;
pub mod exclusivity;
pub mod id;
pub mod interp;
pub mod ir;
pub mod legalize;
pub mod lexer;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod printer;
pub mod resolve;
pub mod strictness;
pub mod token_order;
pub mod tuple_simp;
pub mod verify;
