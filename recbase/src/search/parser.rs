//! Filter expression parser producing a flat list of joined expression groups.

use super::lexer::{Scanner, Token, TokenKind};
use crate::errors::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOp {
    Eq,
    Neq,
    Like,
    Nlike,
    Lt,
    Lte,
    Gt,
    Gte,
    AnyEq,
    AnyNeq,
    AnyLike,
    AnyNlike,
    AnyLt,
    AnyLte,
    AnyGt,
    AnyGte,
}

impl SignOp {
    pub fn parse(literal: &str) -> Option<Self> {
        Some(match literal {
            "=" => Self::Eq,
            "!=" => Self::Neq,
            "~" => Self::Like,
            "!~" => Self::Nlike,
            "<" => Self::Lt,
            "<=" => Self::Lte,
            ">" => Self::Gt,
            ">=" => Self::Gte,
            "?=" => Self::AnyEq,
            "?!=" => Self::AnyNeq,
            "?~" => Self::AnyLike,
            "?!~" => Self::AnyNlike,
            "?<" => Self::AnyLt,
            "?<=" => Self::AnyLte,
            "?>" => Self::AnyGt,
            "?>=" => Self::AnyGte,
            _ => return None,
        })
    }

    /// Whether this is one of the `?`-prefixed "at least one" operators.
    pub fn is_any(self) -> bool {
        !matches!(
            self,
            Self::Eq | Self::Neq | Self::Like | Self::Nlike | Self::Lt | Self::Lte | Self::Gt | Self::Gte
        )
    }

    /// The operator without its `?` prefix.
    pub fn base(self) -> Self {
        match self {
            Self::AnyEq => Self::Eq,
            Self::AnyNeq => Self::Neq,
            Self::AnyLike => Self::Like,
            Self::AnyNlike => Self::Nlike,
            Self::AnyLt => Self::Lt,
            Self::AnyLte => Self::Lte,
            Self::AnyGt => Self::Gt,
            Self::AnyGte => Self::Gte,
            other => other,
        }
    }

    pub fn is_negative(self) -> bool {
        matches!(self.base(), Self::Neq | Self::Nlike)
    }

    /// The positive counterpart of a negative operator (`!=` becomes `=`).
    pub fn positive(self) -> Self {
        match self.base() {
            Self::Neq => Self::Eq,
            Self::Nlike => Self::Like,
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub left: Token,
    pub op: SignOp,
    pub right: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprItem {
    Expr(Expr),
    Group(Vec<ExprGroup>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprGroup {
    pub join: JoinOp,
    pub item: ExprItem,
}

enum Step {
    Left,
    Sign,
    Right,
    Join,
}

/// Parses a filter string such as `a = 1 && (b ~ 'x' || c != null)`.
pub fn parse(text: &str) -> CoreResult<Vec<ExprGroup>> {
    let mut result = Vec::new();
    let mut step = Step::Left;
    let mut join = JoinOp::And;
    let mut left: Option<Token> = None;
    let mut op: Option<SignOp> = None;

    for token in Scanner::new(text).scan_all()? {
        if token.kind == TokenKind::Group {
            if !matches!(step, Step::Left) {
                return Err(CoreError::filter(format!("unexpected group ({})", token.literal)));
            }
            let inner = parse(&token.literal)?;
            if !inner.is_empty() {
                result.push(ExprGroup { join, item: ExprItem::Group(inner) });
            }
            step = Step::Join;
            continue;
        }

        match step {
            Step::Left => {
                if !token.is_operand() {
                    return Err(CoreError::filter(format!(
                        "expected left operand (identifier, function, text or number), got {:?}",
                        token.literal
                    )));
                }
                left = Some(token);
                step = Step::Sign;
            }
            Step::Sign => {
                let parsed = (token.kind == TokenKind::Sign).then(|| SignOp::parse(&token.literal)).flatten();
                let Some(parsed) = parsed else {
                    return Err(CoreError::filter(format!("expected a sign operator, got {:?}", token.literal)));
                };
                op = Some(parsed);
                step = Step::Right;
            }
            Step::Right => {
                if !token.is_operand() {
                    return Err(CoreError::filter(format!(
                        "expected right operand (identifier, function, text or number), got {:?}",
                        token.literal
                    )));
                }
                let (Some(l), Some(o)) = (left.take(), op.take()) else {
                    return Err(CoreError::filter("invalid or incomplete filter expression"));
                };
                result.push(ExprGroup {
                    join,
                    item: ExprItem::Expr(Expr { left: l, op: o, right: token }),
                });
                step = Step::Join;
            }
            Step::Join => {
                if token.kind != TokenKind::Join {
                    return Err(CoreError::filter(format!("expected && or ||, got {:?}", token.literal)));
                }
                join = if token.literal == "||" { JoinOp::Or } else { JoinOp::And };
                step = Step::Left;
            }
        }
    }

    match step {
        Step::Join => Ok(result),
        Step::Left if result.is_empty() && left.is_none() => Err(CoreError::filter("empty filter expression")),
        _ => Err(CoreError::filter("invalid or incomplete filter expression")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_groups() {
        let groups = parse("a = 1 || (b != 'x' && c ?~ d)").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].join, JoinOp::And);
        assert_eq!(groups[1].join, JoinOp::Or);
        let ExprItem::Group(inner) = &groups[1].item else {
            panic!("expected group");
        };
        assert_eq!(inner.len(), 2);
        let ExprItem::Expr(expr) = &inner[1].item else {
            panic!("expected expr");
        };
        assert_eq!(expr.op, SignOp::AnyLike);
        assert_eq!(expr.right.literal, "d");
    }

    #[test]
    fn test_parse_errors() {
        for input in ["", "   ", "a", "a =", "a = b c", "= b", "a = b &&", "(a = 1) b = 2"] {
            assert!(parse(input).is_err(), "expected error for {input:?}");
        }
    }

    #[test]
    fn test_sign_helpers() {
        assert!(SignOp::AnyNeq.is_any());
        assert!(SignOp::AnyNeq.is_negative());
        assert_eq!(SignOp::AnyNlike.positive(), SignOp::Like);
        assert_eq!(SignOp::Gte.positive(), SignOp::Gte);
    }
}
