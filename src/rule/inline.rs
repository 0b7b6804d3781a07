//! Inline expressions using nom.
//!
//! Two uses share one grammar:
//!
//! ```text
//! ds_${0..1}.t_order_${0..2}, ds_2.t_audit     data node lists, expanded
//! ds_${['east','west']}.t_user                 as a Cartesian product
//! t_order_${order_id % 4}                      algorithm templates, rendered
//!                                              against a column value
//! ```
//!
//! `$->{...}` is accepted as a synonym of `${...}`.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{is_not, tag, take_while1},
    character::complete::{char, digit1, multispace0, one_of},
    combinator::{all_consuming, map, map_res, opt, recognize},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, tuple},
};

use crate::ast::Value;
use crate::error::{ShardError, ShardResult};

/// Upper limit on the number of names one expression may expand to.
const MAX_EXPANSION: usize = 1_000_000;

/// Integer arithmetic over column references.
#[derive(Debug, Clone, PartialEq)]
enum Arith {
    Int(i64),
    Column(String),
    Neg(Box<Arith>),
    Binary(Box<Arith>, char, Box<Arith>),
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Range(i64, i64),
    List(Vec<String>),
    Expr(Arith),
}

type Segment = Vec<Part>;

/// Expand a data node expression into names, in declaration order.
pub fn expand(expression: &str) -> ShardResult<Vec<String>> {
    let segments = run(expression, all_consuming(segments))?;
    let mut names = Vec::new();
    for segment in &segments {
        let mut acc = vec![String::new()];
        for part in segment {
            let choices: Vec<String> = match part {
                Part::Text(t) => vec![t.clone()],
                Part::Range(lo, hi) => {
                    if lo > hi {
                        return Err(ShardError::inline(0, format!("empty range {}..{}", lo, hi)));
                    }
                    (*lo..=*hi).map(|n| n.to_string()).collect()
                }
                Part::List(items) => items.clone(),
                Part::Expr(_) => {
                    return Err(ShardError::inline(
                        0,
                        "column expressions cannot be expanded without a value",
                    ));
                }
            };
            if acc.len().saturating_mul(choices.len()) > MAX_EXPANSION {
                return Err(ShardError::inline(
                    0,
                    format!("expression expands to more than {} names", MAX_EXPANSION),
                ));
            }
            acc = acc
                .iter()
                .flat_map(|prefix| choices.iter().map(move |c| format!("{}{}", prefix, c)))
                .collect();
        }
        names.extend(acc.into_iter().map(|n| n.trim().to_string()).filter(|n| !n.is_empty()));
    }
    Ok(names)
}

/// A single-name expression rendered against column values.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    parts: Segment,
}

impl Template {
    pub fn parse(expression: &str) -> ShardResult<Self> {
        let parts = run(expression.trim(), all_consuming(segment))?;
        if parts
            .iter()
            .any(|p| matches!(p, Part::Range(..) | Part::List(_)))
        {
            return Err(ShardError::inline(0, "templates cannot contain ranges or lists"));
        }
        Ok(Self { parts })
    }

    /// Render with `lookup` supplying column values.
    ///
    /// A bare `${column}` renders the value's text; arithmetic requires
    /// integer values.
    pub fn render<'v>(&self, lookup: impl Fn(&str) -> Option<&'v Value>) -> ShardResult<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(t) => out.push_str(t),
                Part::Expr(Arith::Column(name)) => out.push_str(&column(&lookup, name)?.to_plain_string()),
                Part::Expr(expr) => out.push_str(&eval(expr, &lookup)?.to_string()),
                Part::Range(..) | Part::List(_) => {}
            }
        }
        Ok(out)
    }

    /// Column names referenced by the template.
    pub fn columns(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for part in &self.parts {
            if let Part::Expr(expr) = part {
                collect_columns(expr, &mut names);
            }
        }
        names
    }
}

fn collect_columns<'a>(expr: &'a Arith, names: &mut Vec<&'a str>) {
    match expr {
        Arith::Int(_) => {}
        Arith::Column(c) => {
            if !names.contains(&c.as_str()) {
                names.push(c);
            }
        }
        Arith::Neg(inner) => collect_columns(inner, names),
        Arith::Binary(l, _, r) => {
            collect_columns(l, names);
            collect_columns(r, names);
        }
    }
}

fn column<'v>(lookup: &impl Fn(&str) -> Option<&'v Value>, name: &str) -> ShardResult<&'v Value> {
    lookup(name).ok_or_else(|| ShardError::inline(0, format!("no value for column '{}'", name)))
}

fn eval<'v>(expr: &Arith, lookup: &impl Fn(&str) -> Option<&'v Value>) -> ShardResult<i64> {
    let overflow = || ShardError::inline(0, "integer overflow");
    match expr {
        Arith::Int(n) => Ok(*n),
        Arith::Column(name) => column(lookup, name)?.as_i64(),
        Arith::Neg(inner) => eval(inner, lookup)?.checked_neg().ok_or_else(overflow),
        Arith::Binary(l, op, r) => {
            let (a, b) = (eval(l, lookup)?, eval(r, lookup)?);
            if matches!(op, '/' | '%') && b == 0 {
                return Err(ShardError::inline(0, "division by zero"));
            }
            match op {
                '+' => a.checked_add(b),
                '-' => a.checked_sub(b),
                '*' => a.checked_mul(b),
                '/' => a.checked_div(b),
                _ => a.checked_rem_euclid(b),
            }
            .ok_or_else(overflow)
        }
    }
}

/// Run a parser, mapping nom failures to positioned errors.
fn run<'a, O>(input: &'a str, mut parser: impl FnMut(&'a str) -> IResult<&'a str, O>) -> ShardResult<O> {
    match parser(input) {
        Ok((_, out)) => Ok(out),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(ShardError::inline(
            input.len() - e.input.len(),
            format!("unexpected input '{}'", e.input.chars().take(16).collect::<String>()),
        )),
        Err(nom::Err::Incomplete(_)) => Err(ShardError::inline(input.len(), "incomplete expression")),
    }
}

fn segments(input: &str) -> IResult<&str, Vec<Segment>> {
    separated_list1(char(','), segment)(input)
}

fn segment(input: &str) -> IResult<&str, Segment> {
    many0(alt((placeholder, map(text, Part::Text))))(input)
}

/// Literal text up to a comma or the next placeholder.
fn text(input: &str) -> IResult<&str, String> {
    let mut end = 0;
    for (i, c) in input.char_indices() {
        if c == ',' || input[i..].starts_with("${") || input[i..].starts_with("$->{") {
            break;
        }
        end = i + c.len_utf8();
    }
    if end == 0 {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::TakeWhile1,
        )));
    }
    Ok((&input[end..], input[..end].to_string()))
}

fn placeholder(input: &str) -> IResult<&str, Part> {
    delimited(
        pair(alt((tag("${"), tag("$->{"))), multispace0),
        alt((range, list, map(arith, Part::Expr))),
        pair(multispace0, char('}')),
    )(input)
}

fn integer(input: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), str::parse::<i64>)(input)
}

fn range(input: &str) -> IResult<&str, Part> {
    map(
        separated_pair(integer, tuple((multispace0, tag(".."), multispace0)), integer),
        |(lo, hi)| Part::Range(lo, hi),
    )(input)
}

fn list(input: &str) -> IResult<&str, Part> {
    let item = delimited(
        multispace0,
        alt((
            delimited(char('\''), map(opt(is_not("'")), |s: Option<&str>| s.unwrap_or("")), char('\'')),
            delimited(char('"'), map(opt(is_not("\"")), |s: Option<&str>| s.unwrap_or("")), char('"')),
            identifier,
        )),
        multispace0,
    );
    map(
        delimited(char('['), separated_list1(char(','), item), char(']')),
        |items: Vec<&str>| Part::List(items.into_iter().map(str::to_string).collect()),
    )(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn arith(input: &str) -> IResult<&str, Arith> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(pair(delimited(multispace0, one_of("+-"), multispace0), term))(input)?;
    Ok((input, fold(first, rest)))
}

fn term(input: &str) -> IResult<&str, Arith> {
    let (input, first) = factor(input)?;
    let (input, rest) = many0(pair(delimited(multispace0, one_of("*/%"), multispace0), factor))(input)?;
    Ok((input, fold(first, rest)))
}

fn factor(input: &str) -> IResult<&str, Arith> {
    alt((
        map_res(digit1, |d: &str| d.parse::<i64>().map(Arith::Int)),
        map(identifier, |s: &str| Arith::Column(s.to_string())),
        map(preceded(pair(char('-'), multispace0), factor), |f| Arith::Neg(Box::new(f))),
        delimited(pair(char('('), multispace0), arith, pair(multispace0, char(')'))),
    ))(input)
}

fn fold(first: Arith, rest: Vec<(char, Arith)>) -> Arith {
    rest.into_iter()
        .fold(first, |acc, (op, rhs)| Arith::Binary(Box::new(acc), op, Box::new(rhs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cartesian_expansion() {
        let nodes = expand("ds_${0..1}.t_order_${0..2}").unwrap();
        assert_eq!(
            nodes,
            vec![
                "ds_0.t_order_0",
                "ds_0.t_order_1",
                "ds_0.t_order_2",
                "ds_1.t_order_0",
                "ds_1.t_order_1",
                "ds_1.t_order_2",
            ]
        );
    }

    #[test]
    fn test_lists_and_segments() {
        let nodes = expand("ds_${['east', 'west']}.t_user, ds_archive.t_user").unwrap();
        assert_eq!(nodes, vec!["ds_east.t_user", "ds_west.t_user", "ds_archive.t_user"]);
    }

    #[test]
    fn test_arrow_syntax() {
        assert_eq!(expand("t_$->{1..2}").unwrap(), vec!["t_1", "t_2"]);
    }

    #[test]
    fn test_unterminated_placeholder() {
        let err = expand("ds_${0..1").unwrap_err();
        assert!(matches!(err, ShardError::InlineExpression { .. }));
    }

    #[test]
    fn test_template_arithmetic() {
        let t = Template::parse("t_order_${(order_id + 1) % 4}").unwrap();
        assert_eq!(t.columns(), vec!["order_id"]);
        let v = Value::Int(6);
        assert_eq!(t.render(|_| Some(&v)).unwrap(), "t_order_3");
    }

    #[test]
    fn test_template_bare_column_uses_text() {
        let t = Template::parse("t_user_${region}").unwrap();
        let v = Value::from("eu");
        assert_eq!(t.render(|c| (c == "region").then_some(&v)).unwrap(), "t_user_eu");
        assert!(t.render(|_| None).is_err());
    }

    #[test]
    fn test_template_division_by_zero() {
        let t = Template::parse("t_${id / 0}").unwrap();
        let v = Value::Int(1);
        assert!(t.render(|_| Some(&v)).is_err());
    }

    #[test]
    fn test_template_rejects_ranges() {
        assert!(Template::parse("t_${0..3}").is_err());
    }
}
