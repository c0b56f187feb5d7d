//! Repair of model-produced function arguments.
//!
//! Models sometimes write `"duration_seconds": 60*5` instead of a literal.
//! Values that are not JSON scalars are evaluated as arithmetic and replaced
//! by their result. Anything the evaluator cannot handle is left untouched.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

lazy_static! {
    // A `"key": value` pair whose value runs to the next comma, brace,
    // bracket or end of line.
    static ref VALUE_RE: Regex =
        Regex::new(r#""(?:[^"\\]|\\.)*"\s*:\s*([^,{}\[\]"\r\n]+)"#).unwrap();
}

pub fn repair_arguments(raw: &str) -> String {
    if serde_json::from_str::<serde_json::Value>(raw).is_ok() {
        return raw.to_string();
    }

    let mut repaired = String::with_capacity(raw.len());
    let mut last = 0;
    for captures in VALUE_RE.captures_iter(raw) {
        let Some(value) = captures.get(1) else {
            continue;
        };
        let expression = value.as_str().trim_end();
        if expression.is_empty() || serde_json::from_str::<serde_json::Value>(expression).is_ok() {
            continue;
        }
        let Ok(result) = evaluate(expression) else {
            continue;
        };
        let replacement = format_number(result);
        debug!("Replacing expression {:?} with its value {:?}", expression, replacement);
        repaired.push_str(&raw[last..value.start()]);
        repaired.push_str(&replacement);
        last = value.start() + expression.len();
    }
    repaired.push_str(&raw[last..]);
    repaired
}

/// Render an evaluation result as a JSON number; whole values lose the
/// fractional part.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Deepest nesting of parentheses, signs and exponents `evaluate` accepts.
pub const MAX_DEPTH: usize = 64;

/// Evaluate `+ - * / % ^` over decimal numbers with parentheses.
pub fn evaluate(expression: &str) -> anyhow::Result<f64> {
    let mut parser = Parser {
        chars: expression.chars().collect(),
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(anyhow::anyhow!(
            "unexpected {:?} at offset {}",
            parser.chars[parser.pos],
            parser.pos
        ));
    }
    if !value.is_finite() {
        return Err(anyhow::anyhow!("expression {:?} is not finite", expression));
    }
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn skip_ws(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> anyhow::Result<f64> {
        let mut value = self.term()?;
        loop {
            if self.eat('+') {
                value += self.term()?;
            } else if self.eat('-') {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> anyhow::Result<f64> {
        let mut value = self.unary()?;
        loop {
            if self.eat('*') {
                value *= self.unary()?;
            } else if self.eat('/') {
                value /= self.unary()?;
            } else if self.eat('%') {
                let divisor = self.unary()?;
                // Floored modulo.
                value -= (value / divisor).floor() * divisor;
            } else {
                return Ok(value);
            }
        }
    }

    // Every recursive path passes through here.
    fn unary(&mut self) -> anyhow::Result<f64> {
        if self.depth >= MAX_DEPTH {
            return Err(anyhow::anyhow!("expression nested deeper than {} levels", MAX_DEPTH));
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> anyhow::Result<f64> {
        if self.eat('-') {
            return Ok(-self.unary()?);
        }
        if self.eat('+') {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> anyhow::Result<f64> {
        let base = self.atom()?;
        if self.eat('^') {
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> anyhow::Result<f64> {
        if self.eat('(') {
            let value = self.expr()?;
            if !self.eat(')') {
                return Err(anyhow::anyhow!("missing closing parenthesis"));
            }
            return Ok(value);
        }
        self.number()
    }

    fn number(&mut self) -> anyhow::Result<f64> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.chars.len()
            && (self.chars[self.pos].is_ascii_digit() || self.chars[self.pos] == '.')
        {
            self.pos += 1;
        }
        if self.pos < self.chars.len() && matches!(self.chars[self.pos], 'e' | 'E') && self.pos > start {
            let mark = self.pos;
            self.pos += 1;
            if self.pos < self.chars.len() && matches!(self.chars[self.pos], '+' | '-') {
                self.pos += 1;
            }
            let digits = self.pos;
            while self.pos < self.chars.len() && self.chars[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
            if self.pos == digits {
                self.pos = mark;
            }
        }
        if start == self.pos {
            return Err(anyhow::anyhow!("expected a number at offset {}", start));
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map_err(|e| anyhow::anyhow!("bad number {:?}: {}", text, e))
    }
}
