use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use parley_core::domain::decision::ToolKind;
use parley_core::domain::entity::EXPRESSION;
use parley_core::domain::tool::{ToolErrorKind, ToolParams};

use super::{Tool, ToolFailure};

const MAX_DEPTH: usize = 32;

/// Arithmetic over `+ - * / % ^` and parentheses. Nothing else is accepted.
#[derive(Clone, Copy, Debug, Default)]
pub struct CalculatorTool;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub expression: String,
    pub result: f64,
}

impl CalculationResult {
    pub fn render(&self) -> String {
        format!("The result of {} is {}.", self.expression, format_number(self.result))
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Calculator
    }

    fn required_params(&self) -> &'static [&'static str] {
        &[EXPRESSION]
    }

    async fn execute(&self, params: &ToolParams) -> Result<Value, ToolFailure> {
        let expression = params.text(EXPRESSION).ok_or_else(|| {
            ToolFailure::new(ToolErrorKind::MissingParam, "expression must be text")
        })?;
        let result = evaluate(expression)?;

        let calculation = CalculationResult { expression: expression.trim().to_string(), result };
        serde_json::to_value(calculation)
            .map_err(|error| ToolFailure::new(ToolErrorKind::ValidationFailed, error.to_string()))
    }
}

/// Whole numbers print without a fraction; everything else is rounded to ten
/// decimal places. Magnitudes past `1e15` carry no fraction worth rounding and
/// would overflow when scaled.
pub fn format_number(value: f64) -> String {
    let rounded = if value.abs() < 1e15 { (value * 1e10).round() / 1e10 } else { value };
    if rounded == 0.0 {
        return "0".to_string();
    }
    format!("{rounded}")
}

pub fn evaluate(expression: &str) -> Result<f64, ToolFailure> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(invalid("empty expression"));
    }

    let mut parser = Parser { tokens, position: 0 };
    let value = parser.expression(0)?;
    if parser.position != parser.tokens.len() {
        return Err(invalid("unexpected trailing input"));
    }
    if !value.is_finite() {
        return Err(invalid("result is not a finite number"));
    }
    Ok(value)
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Token {
    Number(f64),
    Operator(char),
    Open,
    Close,
}

fn tokenize(expression: &str) -> Result<Vec<Token>, ToolFailure> {
    let mut tokens = Vec::new();
    let mut chars = expression.char_indices().peekable();

    while let Some((start, character)) = chars.next() {
        match character {
            ' ' | '\t' => {}
            '0'..='9' | '.' => {
                let mut end = start + character.len_utf8();
                while let Some(&(index, next)) = chars.peek() {
                    if !(next.is_ascii_digit() || next == '.') {
                        break;
                    }
                    end = index + next.len_utf8();
                    chars.next();
                }
                let literal = &expression[start..end];
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| invalid(format!("malformed number `{literal}`")))?;
                tokens.push(Token::Number(number));
            }
            '+' | '-' | '*' | '/' | '%' | '^' => tokens.push(Token::Operator(character)),
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            other => {
                return Err(ToolFailure::new(
                    ToolErrorKind::UnsafeInput,
                    format!("character `{other}` is not allowed in an expression"),
                ))
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.position).copied()
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.peek();
        self.position += 1;
        token
    }

    fn expression(&mut self, depth: usize) -> Result<f64, ToolFailure> {
        let mut value = self.term(depth)?;
        while let Some(Token::Operator(operator @ ('+' | '-'))) = self.peek() {
            self.advance();
            let rhs = self.term(depth)?;
            value = if operator == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self, depth: usize) -> Result<f64, ToolFailure> {
        let mut value = self.power(depth)?;
        while let Some(Token::Operator(operator @ ('*' | '/' | '%'))) = self.peek() {
            self.advance();
            let rhs = self.power(depth)?;
            value = match operator {
                '*' => value * rhs,
                _ if rhs == 0.0 => return Err(invalid("division by zero")),
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    // Right associative: 2 ^ 3 ^ 2 == 2 ^ 9.
    fn power(&mut self, depth: usize) -> Result<f64, ToolFailure> {
        let base = self.unary(depth)?;
        if let Some(Token::Operator('^')) = self.peek() {
            self.advance();
            let exponent = self.power(depth + 1)?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self, depth: usize) -> Result<f64, ToolFailure> {
        if depth > MAX_DEPTH {
            return Err(invalid("expression nests too deeply"));
        }
        match self.peek() {
            Some(Token::Operator('-')) => {
                self.advance();
                Ok(-self.unary(depth + 1)?)
            }
            Some(Token::Operator('+')) => {
                self.advance();
                self.unary(depth + 1)
            }
            _ => self.primary(depth),
        }
    }

    fn primary(&mut self, depth: usize) -> Result<f64, ToolFailure> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::Open) => {
                let value = self.expression(depth + 1)?;
                match self.advance() {
                    Some(Token::Close) => Ok(value),
                    _ => Err(invalid("unbalanced parentheses")),
                }
            }
            Some(token) => Err(invalid(format!("unexpected token {token:?}"))),
            None => Err(invalid("expression ends early")),
        }
    }
}

fn invalid(detail: impl Into<String>) -> ToolFailure {
    ToolFailure::new(ToolErrorKind::ValidationFailed, detail)
}

#[cfg(test)]
mod tests {
    use parley_core::domain::tool::ToolErrorKind;

    use super::{evaluate, format_number, CalculationResult};

    fn error_kind(expression: &str) -> Option<ToolErrorKind> {
        evaluate(expression).err().map(|failure| failure.kind)
    }

    #[test]
    fn precedence_and_parentheses() {
        assert_eq!(evaluate("25 + 15").ok(), Some(40.0));
        assert_eq!(evaluate("2 + 3 * 4").ok(), Some(14.0));
        assert_eq!(evaluate("(2 + 3) * 4").ok(), Some(20.0));
        assert_eq!(evaluate("2 ^ 3 ^ 2").ok(), Some(512.0));
        assert_eq!(evaluate("-3 + 10 % 4").ok(), Some(-1.0));
        assert_eq!(evaluate("7 / 2").ok(), Some(3.5));
    }

    #[test]
    fn malformed_expressions_fail_validation() {
        assert_eq!(error_kind("1 / 0"), Some(ToolErrorKind::ValidationFailed));
        assert_eq!(error_kind("(1 + 2"), Some(ToolErrorKind::ValidationFailed));
        assert_eq!(error_kind("1 +"), Some(ToolErrorKind::ValidationFailed));
        assert_eq!(error_kind("1.2.3 + 1"), Some(ToolErrorKind::ValidationFailed));
        assert_eq!(error_kind(""), Some(ToolErrorKind::ValidationFailed));
        assert_eq!(error_kind(&"(".repeat(64)), Some(ToolErrorKind::ValidationFailed));
    }

    #[test]
    fn foreign_characters_are_unsafe() {
        assert_eq!(error_kind("__import__('os')"), Some(ToolErrorKind::UnsafeInput));
        assert_eq!(error_kind("2 + x"), Some(ToolErrorKind::UnsafeInput));
    }

    #[test]
    fn whole_results_render_without_fraction() {
        assert_eq!(format_number(40.0), "40");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(format_number(-0.0), "0");

        let rendered =
            CalculationResult { expression: "25 + 15".to_string(), result: 40.0 }.render();
        assert_eq!(rendered, "The result of 25 + 15 is 40.");
    }

    #[test]
    fn huge_finite_results_render_as_digits() {
        assert_eq!(format_number(1e20), "100000000000000000000");

        let result = evaluate("10 ^ 300").expect("finite power");
        let rendered = format_number(result);
        assert!(rendered.len() > 300, "{rendered}");
        assert!(rendered.chars().all(|c| c.is_ascii_digit()), "{rendered}");

        let text = CalculationResult { expression: "10 ^ 300".to_string(), result }.render();
        assert!(!text.contains("inf"));
    }
}
