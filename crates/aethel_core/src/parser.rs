//! Tiny recursive-descent parser for the constraint expressions described
//! in §3 of the spec: `lhs OP rhs` where each side is built from integer
//! variables, literals, and `+ − × / %`.
//!
//! The original source builds these constraints as a Python AST and walks
//! it into a Z3 expression (`_ast_to_z3` in `judge.py`). There is no Z3
//! here, so instead of an AST-to-solver bridge this module produces a
//! small `Expr` tree that the conservation pre-check, overflow sentinel,
//! and bounded solver (`solver.rs`) each walk for their own purpose.

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::AethelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rel {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Var(String),
    Lit(i128),
    Bin(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConstraint {
    pub lhs: Expr,
    pub rel: Rel,
    pub rhs: Expr,
}

impl Expr {
    /// Every variable name occurring in this expression, in left-to-right
    /// order of first appearance (duplicates removed).
    pub fn variables(&self, out: &mut Vec<String>) {
        match self {
            Expr::Var(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::Lit(_) => {}
            Expr::Bin(_, l, r) => {
                l.variables(out);
                r.variables(out);
            }
        }
    }
}

impl ParsedConstraint {
    pub fn variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.lhs.variables(&mut out);
        self.rhs.variables(&mut out);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Num(i128),
    Op(char),
    Rel(Rel),
    LParen,
    RParen,
}

fn tokenize(text: &str) -> core::result::Result<Vec<Token>, AethelError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let s: String = chars[start..i].iter().collect();
            let n: i128 = s
                .parse()
                .map_err(|_| AethelError::ParseError(s.clone()))?;
            tokens.push(Token::Num(n));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let s: String = chars[start..i].iter().collect();
            tokens.push(Token::Ident(s));
            continue;
        }
        match c {
            '+' | '-' | '*' | '/' | '%' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Rel(Rel::Eq));
                    i += 2;
                } else {
                    tokens.push(Token::Rel(Rel::Eq));
                    i += 1;
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Rel(Rel::Ne));
                    i += 2;
                } else {
                    return Err(AethelError::ParseError(text.to_string()));
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Rel(Rel::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Rel(Rel::Gt));
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Rel(Rel::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Rel(Rel::Lt));
                    i += 1;
                }
            }
            _ => return Err(AethelError::ParseError(text.to_string())),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> core::result::Result<Expr, AethelError> {
        let mut node = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Op('+')) => {
                    self.next();
                    let rhs = self.term()?;
                    node = Expr::Bin(BinOp::Add, Box::new(node), Box::new(rhs));
                }
                Some(Token::Op('-')) => {
                    self.next();
                    let rhs = self.term()?;
                    node = Expr::Bin(BinOp::Sub, Box::new(node), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(node)
    }

    // term := factor (('*' | '/' | '%') factor)*
    fn term(&mut self) -> core::result::Result<Expr, AethelError> {
        let mut node = self.factor()?;
        loop {
            match self.peek() {
                Some(Token::Op('*')) => {
                    self.next();
                    let rhs = self.factor()?;
                    node = Expr::Bin(BinOp::Mul, Box::new(node), Box::new(rhs));
                }
                Some(Token::Op('/')) => {
                    self.next();
                    let rhs = self.factor()?;
                    node = Expr::Bin(BinOp::Div, Box::new(node), Box::new(rhs));
                }
                Some(Token::Op('%')) => {
                    self.next();
                    let rhs = self.factor()?;
                    node = Expr::Bin(BinOp::Mod, Box::new(node), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(node)
    }

    // factor := '-' factor | NUM | IDENT | '(' expr ')'
    fn factor(&mut self) -> core::result::Result<Expr, AethelError> {
        match self.next() {
            Some(Token::Op('-')) => {
                let inner = self.factor()?;
                Ok(Expr::Bin(BinOp::Sub, Box::new(Expr::Lit(0)), Box::new(inner)))
            }
            Some(Token::Num(n)) => Ok(Expr::Lit(n)),
            Some(Token::Ident(name)) => Ok(Expr::Var(name)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(AethelError::ParseError("unbalanced parentheses".to_string())),
                }
            }
            other => Err(AethelError::ParseError(alloc::format!("{:?}", other))),
        }
    }
}

/// Parse a constraint of the shape `expr REL expr`.
pub fn parse_constraint(text: &str) -> core::result::Result<ParsedConstraint, AethelError> {
    let tokens = tokenize(text)?;
    let rel_pos = tokens
        .iter()
        .position(|t| matches!(t, Token::Rel(_)))
        .ok_or_else(|| AethelError::ParseError(text.to_string()))?;
    let rel = match &tokens[rel_pos] {
        Token::Rel(r) => *r,
        _ => unreachable!(),
    };
    let mut lhs_parser = Parser {
        tokens: tokens[..rel_pos].to_vec(),
        pos: 0,
    };
    let lhs = lhs_parser.expr()?;
    let mut rhs_parser = Parser {
        tokens: tokens[rel_pos + 1..].to_vec(),
        pos: 0,
    };
    let rhs = rhs_parser.expr()?;
    Ok(ParsedConstraint { lhs, rel, rhs })
}

/// Evaluate an expression given a full variable assignment. Returns
/// `None` on division/modulo by zero (the caller treats that as a
/// contradiction rather than panicking).
pub fn eval(expr: &Expr, assignment: &alloc::collections::BTreeMap<String, i128>) -> Option<i128> {
    match expr {
        Expr::Lit(n) => Some(*n),
        Expr::Var(name) => assignment.get(name).copied(),
        Expr::Bin(op, l, r) => {
            let lv = eval(l, assignment)?;
            let rv = eval(r, assignment)?;
            match op {
                BinOp::Add => lv.checked_add(rv),
                BinOp::Sub => lv.checked_sub(rv),
                BinOp::Mul => lv.checked_mul(rv),
                BinOp::Div => {
                    if rv == 0 {
                        None
                    } else {
                        Some(lv / rv)
                    }
                }
                BinOp::Mod => {
                    if rv == 0 {
                        None
                    } else {
                        Some(lv % rv)
                    }
                }
            }
        }
    }
}
