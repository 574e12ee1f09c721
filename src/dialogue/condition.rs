//! Boolean condition expressions over the session context.
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! expr    := and ("or" and)*
//! and     := unary ("and" unary)*
//! unary   := "not" unary | compare
//! compare := operand (("==" | "!=" | "<=" | ">=" | "<" | ">" | "not in" | "in") operand)?
//! operand := number | string | true | false | null | ident | "[" list "]" | "(" expr ")"
//! ```
//!
//! `True`/`False`/`None` are accepted as aliases so that graphs written for
//! Python-style conditions keep working.

use std::cmp::Ordering;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, satisfy},
    combinator::{all_consuming, map, map_res, not, opt, peek, recognize, value, verify},
    multi::{many0, many0_count, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::dialogue::context::{Context, Value};
use crate::error::EvalError;

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    List(Vec<Expr>),
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "in", "true", "false", "null", "True", "False", "None",
];

/// Parse a condition string into an expression tree.
pub fn parse(input: &str) -> Result<Expr, EvalError> {
    match all_consuming(ws(expr))(input) {
        Ok((_, e)) => Ok(e),
        Err(err) => Err(EvalError::Syntax {
            expr: input.to_string(),
            reason: err.to_string(),
        }),
    }
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// A keyword that is not the prefix of a longer identifier ("in" vs "index").
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(kw), not(peek(satisfy(is_ident_char))))
}

fn expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(ws(keyword("or")), and_expr))(input)?;
    let folded = rest
        .into_iter()
        .fold(first, |acc, e| Expr::Or(Box::new(acc), Box::new(e)));
    Ok((input, folded))
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = unary(input)?;
    let (input, rest) = many0(preceded(ws(keyword("and")), unary))(input)?;
    let folded = rest
        .into_iter()
        .fold(first, |acc, e| Expr::And(Box::new(acc), Box::new(e)));
    Ok((input, folded))
}

fn unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(keyword("not")), unary), |e| Expr::Not(Box::new(e))),
        compare,
    ))(input)
}

fn compare(input: &str) -> IResult<&str, Expr> {
    let (input, lhs) = operand(input)?;
    let (input, tail) = opt(pair(ws(compare_op), operand))(input)?;
    let e = match tail {
        Some((op, rhs)) => Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        None => lhs,
    };
    Ok((input, e))
}

fn compare_op(input: &str) -> IResult<&str, CompareOp> {
    alt((
        value(CompareOp::Eq, tag("==")),
        value(CompareOp::Ne, tag("!=")),
        value(CompareOp::Le, tag("<=")),
        value(CompareOp::Ge, tag(">=")),
        value(CompareOp::Lt, tag("<")),
        value(CompareOp::Gt, tag(">")),
        value(
            CompareOp::NotIn,
            tuple((keyword("not"), multispace0, keyword("in"))),
        ),
        value(CompareOp::In, keyword("in")),
    ))(input)
}

fn operand(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        map(number, Expr::Literal),
        map(string_literal, |s| Expr::Literal(Value::Str(s.to_string()))),
        map(constant, Expr::Literal),
        map(identifier, |s| Expr::Var(s.to_string())),
        map(
            delimited(char('['), separated_list0(char(','), ws(expr)), ws(char(']'))),
            Expr::List,
        ),
        delimited(char('('), ws(expr), char(')')),
    )))(input)
}

fn number(input: &str) -> IResult<&str, Value> {
    map_res(
        recognize(tuple((opt(char('-')), digit1, opt(pair(char('.'), digit1))))),
        |s: &str| {
            if s.contains('.') {
                s.parse::<f64>().map(Value::Float).map_err(|e| e.to_string())
            } else {
                s.parse::<i64>().map(Value::Int).map_err(|e| e.to_string())
            }
        },
    )(input)
}

fn string_literal(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('"'), take_until("\""), char('"')),
        delimited(char('\''), take_until("'"), char('\'')),
    ))(input)
}

fn constant(input: &str) -> IResult<&str, Value> {
    alt((
        value(Value::Bool(true), alt((keyword("true"), keyword("True")))),
        value(Value::Bool(false), alt((keyword("false"), keyword("False")))),
        value(Value::Null, alt((keyword("null"), keyword("None")))),
    ))(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    verify(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0_count(alt((alphanumeric1, tag("_")))),
        )),
        |s: &str| !KEYWORDS.contains(&s),
    )(input)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Parse and evaluate `input`, returning its truthiness.
pub fn evaluate(input: &str, ctx: &Context) -> Result<bool, EvalError> {
    let e = parse(input)?;
    Ok(e.eval(ctx)?.is_truthy())
}

impl Expr {
    pub fn eval(&self, ctx: &Context) -> Result<Value, EvalError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Var(name) => ctx
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::UnknownVariable(name.clone())),
            Expr::List(items) => items
                .iter()
                .map(|e| e.eval(ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Expr::Not(e) => Ok(Value::Bool(!e.eval(ctx)?.is_truthy())),
            Expr::And(a, b) => {
                if !a.eval(ctx)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(b.eval(ctx)?.is_truthy()))
            }
            Expr::Or(a, b) => {
                if a.eval(ctx)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(b.eval(ctx)?.is_truthy()))
            }
            Expr::Compare { op, lhs, rhs } => {
                let l = lhs.eval(ctx)?;
                let r = rhs.eval(ctx)?;
                compare_values(*op, &l, &r).map(Value::Bool)
            }
        }
    }
}

fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => l == r,
    }
}

fn compare_values(op: CompareOp, l: &Value, r: &Value) -> Result<bool, EvalError> {
    let mismatch = || EvalError::TypeMismatch {
        op: op.symbol(),
        lhs: l.type_name(),
        rhs: r.type_name(),
    };

    match op {
        CompareOp::Eq => Ok(loose_eq(l, r)),
        CompareOp::Ne => Ok(!loose_eq(l, r)),
        CompareOp::In | CompareOp::NotIn => {
            let found = match (l, r) {
                (_, Value::List(items)) => items.iter().any(|item| loose_eq(l, item)),
                (Value::Str(needle), Value::Str(hay)) => hay.contains(needle.as_str()),
                _ => return Err(mismatch()),
            };
            Ok(if op == CompareOp::In { found } else { !found })
        }
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ord = match (l, r) {
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                _ => match (l.as_f64(), r.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b).ok_or_else(mismatch)?,
                    _ => return Err(mismatch()),
                },
            };
            Ok(match op {
                CompareOp::Lt => ord == Ordering::Less,
                CompareOp::Le => ord != Ordering::Greater,
                CompareOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::context::{AMOUNT_OWED, ENTRY_PLATES, FAILURES, PLATE};

    fn ctx() -> Context {
        let mut ctx = Context::new();
        ctx.set(PLATE, "ABC123");
        ctx.set(FAILURES, 2i64);
        ctx.set(AMOUNT_OWED, 0.0);
        ctx.set(ENTRY_PLATES, vec!["ABC123".to_string(), "XYZ789".to_string()]);
        ctx
    }

    #[test]
    fn relational_on_numbers() {
        let c = ctx();
        assert_eq!(evaluate("failures >= 2", &c), Ok(true));
        assert_eq!(evaluate("failures < 2", &c), Ok(false));
        assert_eq!(evaluate("amount_owed == 0", &c), Ok(true));
        assert_eq!(evaluate("amount_owed != 0.5", &c), Ok(true));
    }

    #[test]
    fn string_equality_and_membership() {
        let c = ctx();
        assert_eq!(evaluate("plate == 'ABC123'", &c), Ok(true));
        assert_eq!(evaluate("plate in entry_plates", &c), Ok(true));
        assert_eq!(evaluate("'QQQ' not in entry_plates", &c), Ok(true));
        assert_eq!(evaluate("'ABC' in plate", &c), Ok(true));
        assert_eq!(evaluate("plate in ['A', \"ABC123\"]", &c), Ok(true));
    }

    #[test]
    fn bare_truthiness_and_logic() {
        let c = ctx();
        assert_eq!(evaluate("plate", &c), Ok(true));
        assert_eq!(evaluate("plate_recognized", &c), Ok(false));
        assert_eq!(evaluate("not plate_recognized and failures > 1", &c), Ok(true));
        assert_eq!(evaluate("plate_recognized or (failures == 2)", &c), Ok(true));
        assert_eq!(evaluate("confirmed == None", &c), Ok(true));
    }

    #[test]
    fn keywords_do_not_swallow_identifiers() {
        let mut c = ctx();
        c.set("index", 1i64);
        c.set("order", true);
        assert_eq!(evaluate("index == 1 and order", &c), Ok(true));
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let c = ctx();
        assert_eq!(
            evaluate("missing > 1", &c),
            Err(EvalError::UnknownVariable("missing".into()))
        );
    }

    #[test]
    fn malformed_expression_is_a_syntax_error() {
        let c = ctx();
        assert!(matches!(
            evaluate("failures >=", &c),
            Err(EvalError::Syntax { .. })
        ));
        assert!(matches!(
            evaluate("__import__('os').system('x')", &c),
            Err(EvalError::Syntax { .. })
        ));
    }

    #[test]
    fn ordering_mismatch_is_reported() {
        let c = ctx();
        assert!(matches!(
            evaluate("plate > 3", &c),
            Err(EvalError::TypeMismatch { op: ">", .. })
        ));
    }

    #[test]
    fn parses_into_tagged_tree() {
        let e = parse("failures >= 2").unwrap();
        assert_eq!(
            e,
            Expr::Compare {
                op: CompareOp::Ge,
                lhs: Box::new(Expr::Var("failures".into())),
                rhs: Box::new(Expr::Literal(Value::Int(2))),
            }
        );
    }
}
