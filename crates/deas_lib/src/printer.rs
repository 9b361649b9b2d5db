//! Source text for syntax trees.
//!
//! Every expression carries a precedence level. A child is parenthesized
//! when the slot it fills demands a higher level, or the same level on the
//! side where associativity would otherwise regroup it.

use crate::naming::is_identifier;
use crate::syntax::{
    ASSIGNMENT_PRECEDENCE, Associativity, Expr, FunctionDef, Literal, MAX_PRECEDENCE,
    MEMBER_PRECEDENCE, MIN_PRECEDENCE, Statement,
};

#[derive(Debug, Clone, Copy)]
pub struct Printer {
    indent_width: usize,
}

impl Default for Printer {
    fn default() -> Self {
        Self { indent_width: 4 }
    }
}

pub fn print_statements(statements: &[Statement], indent_width: usize) -> String {
    Printer::new(indent_width).statements(statements)
}

impl Printer {
    pub fn new(indent_width: usize) -> Self {
        Self { indent_width }
    }

    pub fn expression(&self, expr: &Expr) -> String {
        self.compose(expr, 0, MIN_PRECEDENCE, false)
    }

    pub fn statements(&self, statements: &[Statement]) -> String {
        let mut out = String::new();
        self.write_block(&mut out, statements, 0);
        out
    }

    fn expr_at(&self, expr: &Expr, depth: usize) -> String {
        self.compose(expr, depth, MIN_PRECEDENCE, false)
    }

    fn pad(&self, depth: usize) -> String {
        " ".repeat(depth * self.indent_width)
    }

    fn compose(&self, expr: &Expr, depth: usize, required: i32, wrap_equal: bool) -> String {
        let level = expr.precedence().level;
        let text = self.render(expr, depth);
        if required > level || (wrap_equal && required == level) {
            format!("({text})")
        } else {
            text
        }
    }

    fn render(&self, expr: &Expr, depth: usize) -> String {
        match expr {
            Expr::Literal(literal) => render_literal(literal),
            Expr::Name(name) => name.clone(),
            Expr::Array(items) => {
                let items: Vec<String> = items
                    .iter()
                    .map(|e| self.compose(e, depth, ASSIGNMENT_PRECEDENCE + 1, false))
                    .collect();
                format!("[{}]", items.join(", "))
            }
            Expr::Object(pairs) => {
                if pairs.is_empty() {
                    return "{}".to_string();
                }
                let pairs: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| {
                        let key = match k.as_string_literal() {
                            Some(s) if is_identifier(s) => s.to_string(),
                            _ => self.compose(k, depth, MAX_PRECEDENCE, false),
                        };
                        format!("{key}: {}", self.compose(v, depth, ASSIGNMENT_PRECEDENCE + 1, false))
                    })
                    .collect();
                format!("{{ {} }}", pairs.join(", "))
            }
            Expr::Unary { op, operand } => {
                let level = op.precedence().level;
                format!("{}{}", op.token(), self.compose(operand, depth, level, false))
            }
            Expr::Binary { op, lhs, rhs } => {
                let p = op.precedence();
                let l = self.compose(lhs, depth, p.level, p.associativity == Associativity::RightToLeft);
                let r = self.compose(rhs, depth, p.level, p.associativity == Associativity::LeftToRight);
                format!("{l} {} {r}", op.token())
            }
            Expr::Ternary { condition, then, otherwise } => {
                let level = expr.precedence().level;
                format!(
                    "{} ? {} : {}",
                    self.compose(condition, depth, level, true),
                    self.compose(then, depth, level, false),
                    self.compose(otherwise, depth, level, false)
                )
            }
            Expr::Member { object, key } => self.render_member(object, key, depth),
            Expr::Call { callee, args, construct } => {
                let callee_level = match (&**callee, construct) {
                    (Expr::Call { .. }, true) => MAX_PRECEDENCE,
                    _ => MEMBER_PRECEDENCE,
                };
                let callee = self.compose(callee, depth, callee_level, false);
                let args: Vec<String> = args
                    .iter()
                    .map(|a| self.compose(a, depth, ASSIGNMENT_PRECEDENCE + 1, false))
                    .collect();
                let prefix = if *construct { "new " } else { "" };
                format!("{prefix}{callee}({})", args.join(", "))
            }
            Expr::Enumerate(object) => format!("enumerate({})", self.expression(object)),
            Expr::Function(def) => self.render_function(def, depth),
        }
    }

    fn render_member(&self, object: &Expr, key: &Expr, depth: usize) -> String {
        if object.is_empty_receiver() {
            return match key.as_string_literal() {
                Some(s) => s.to_string(),
                None => format!("this[{}]", self.expr_at(key, depth)),
            };
        }
        // `1.x` would lex as a number
        let required = match object {
            Expr::Literal(Literal::Integer(_) | Literal::Float(_)) => MAX_PRECEDENCE + 1,
            _ => MEMBER_PRECEDENCE,
        };
        let object = self.compose(object, depth, required, false);
        match key.as_string_literal() {
            Some(s) if is_identifier(s) => format!("{object}.{s}"),
            _ => format!("{object}[{}]", self.expr_at(key, depth)),
        }
    }

    fn render_function(&self, def: &FunctionDef, depth: usize) -> String {
        let mut out = match &def.name {
            Some(name) => format!("function {name}({}) {{\n", def.params.join(", ")),
            None => format!("function({}) {{\n", def.params.join(", ")),
        };
        self.write_block(&mut out, &def.body, depth + 1);
        out.push_str(&self.pad(depth));
        out.push('}');
        out
    }

    fn write_block(&self, out: &mut String, statements: &[Statement], depth: usize) {
        for s in statements {
            self.write_statement(out, s, depth);
        }
    }

    fn write_braced(&self, out: &mut String, head: &str, body: &[Statement], depth: usize) {
        let pad = self.pad(depth);
        out.push_str(&format!("{pad}{head} {{\n"));
        self.write_block(out, body, depth + 1);
        out.push_str(&format!("{pad}}}\n"));
    }

    fn write_statement(&self, out: &mut String, statement: &Statement, depth: usize) {
        let pad = self.pad(depth);
        match statement {
            Statement::Assign { target, value, declare } => {
                let var = if *declare { "var " } else { "" };
                out.push_str(&format!(
                    "{pad}{var}{} = {};\n",
                    self.compose(target, depth, ASSIGNMENT_PRECEDENCE + 1, false),
                    self.compose(value, depth, ASSIGNMENT_PRECEDENCE, false)
                ));
            }
            Statement::Declare(name) => out.push_str(&format!("{pad}var {name};\n")),
            Statement::Expression(e) => {
                out.push_str(&format!("{pad}{};\n", self.compose(e, depth, MIN_PRECEDENCE, false)));
            }
            Statement::Leftover(e) => {
                let text = self.compose(e, depth, MIN_PRECEDENCE, false);
                if text.contains('\n') {
                    out.push_str(&format!("{pad}{text};\n"));
                } else {
                    out.push_str(&format!("{pad}// push {text}\n"));
                }
            }
            Statement::Return(Some(e)) => out.push_str(&format!("{pad}return {};\n", self.expr_at(e, depth))),
            Statement::Return(None) => out.push_str(&format!("{pad}return;\n")),
            Statement::Throw(e) => out.push_str(&format!("{pad}throw {};\n", self.expr_at(e, depth))),
            Statement::Break => out.push_str(&format!("{pad}break;\n")),
            Statement::Continue => out.push_str(&format!("{pad}continue;\n")),
            Statement::If { condition, then, otherwise } => {
                self.write_if(out, condition, then, otherwise, depth);
            }
            Statement::Loop { condition, maintenance, body } if maintenance.is_empty() => {
                let head = format!("while ({})", self.expr_at(condition, depth));
                self.write_braced(out, &head, body, depth);
            }
            Statement::Loop { condition, maintenance, body } => {
                out.push_str(&format!("{pad}while (true) {{\n"));
                self.write_block(out, maintenance, depth + 1);
                let exit = Expr::not(condition.clone());
                let head = format!("if ({})", self.expr_at(&exit, depth));
                self.write_braced(out, &head, &[Statement::Break], depth + 1);
                self.write_block(out, body, depth + 1);
                out.push_str(&format!("{pad}}}\n"));
            }
            Statement::ForIn { key, object, body } => {
                let head = format!("for ({} in {})", self.expr_at(key, depth), self.expr_at(object, depth));
                self.write_braced(out, &head, body, depth);
            }
            Statement::Function(def) => {
                out.push_str(&pad);
                out.push_str(&self.render_function(def, depth));
                out.push('\n');
            }
        }
    }

    fn write_if(
        &self,
        out: &mut String,
        condition: &Expr,
        then: &[Statement],
        otherwise: &[Statement],
        depth: usize,
    ) {
        let pad = self.pad(depth);
        out.push_str(&format!("{pad}if ({}) {{\n", self.expr_at(condition, depth)));
        self.write_block(out, then, depth + 1);

        let mut rest = otherwise;
        loop {
            match rest {
                [] => break,
                [Statement::If { condition, then, otherwise }] => {
                    out.push_str(&format!("{pad}}} else if ({}) {{\n", self.expr_at(condition, depth)));
                    self.write_block(out, then, depth + 1);
                    rest = otherwise;
                }
                _ => {
                    out.push_str(&format!("{pad}}} else {{\n"));
                    self.write_block(out, rest, depth + 1);
                    break;
                }
            }
        }
        out.push_str(&format!("{pad}}}\n"));
    }
}

fn render_literal(literal: &Literal) -> String {
    match literal {
        Literal::String(s) => serde_json::to_string(s).unwrap_or_else(|_| format!("{s:?}")),
        Literal::Integer(v) => v.to_string(),
        Literal::Float(v) if v.is_nan() => "NaN".to_string(),
        Literal::Float(v) if v.is_infinite() => {
            if *v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
        }
        Literal::Float(v) => v.to_string(),
        Literal::Boolean(b) => b.to_string(),
        Literal::Null => "null".to_string(),
        Literal::Undefined => "undefined".to_string(),
    }
}
