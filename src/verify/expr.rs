//! Minimal expression engine backing the symbolic verifier: a tokenizer and
//! precedence parser over one free variable `x`, numeric evaluation,
//! symbolic differentiation, and constant-fold simplification. Only the
//! operations the verifier exercises are supported; anything else makes the
//! caller degrade to a skipped check.

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Var,
    Pi,
    E,
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Call(Func, Box<Expr>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Ln,
    Sqrt,
    Exp,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sin" => Some(Self::Sin),
            "cos" => Some(Self::Cos),
            "tan" => Some(Self::Tan),
            // `log` is treated as the natural log, matching the upstream
            // notation mapping.
            "ln" | "log" => Some(Self::Ln),
            "sqrt" => Some(Self::Sqrt),
            "exp" => Some(Self::Exp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];
        match ch {
            ' ' | '\t' => index += 1,
            '+' => {
                tokens.push(Token::Plus);
                index += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                index += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                index += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                index += 1;
            }
            '^' => {
                tokens.push(Token::Caret);
                index += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                index += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                index += 1;
            }
            _ if ch.is_ascii_digit() || ch == '.' => {
                let start = index;
                while index < chars.len() && (chars[index].is_ascii_digit() || chars[index] == '.')
                {
                    index += 1;
                }
                let literal: String = chars[start..index].iter().collect();
                tokens.push(Token::Num(literal.parse().ok()?));
            }
            _ if ch.is_ascii_alphabetic() => {
                let start = index;
                while index < chars.len() && chars[index].is_ascii_alphabetic() {
                    index += 1;
                }
                let name: String = chars[start..index].iter().collect();
                tokens.push(Token::Ident(name.to_ascii_lowercase()));
            }
            _ => return None,
        }
    }

    Some(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, token: &Token) -> Option<()> {
        if self.peek() == Some(token) {
            self.position += 1;
            Some(())
        } else {
            None
        }
    }

    // Additive < multiplicative < unary < power < primary; power is
    // right-associative.
    fn parse_additive(&mut self) -> Option<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    let right = self.parse_multiplicative()?;
                    left = Expr::Add(Box::new(left), Box::new(right));
                }
                Some(Token::Minus) => {
                    self.advance();
                    let right = self.parse_multiplicative()?;
                    left = Expr::Sub(Box::new(left), Box::new(right));
                }
                _ => return Some(left),
            }
        }
    }

    fn parse_multiplicative(&mut self) -> Option<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.advance();
                    let right = self.parse_unary()?;
                    left = Expr::Mul(Box::new(left), Box::new(right));
                }
                Some(Token::Slash) => {
                    self.advance();
                    let right = self.parse_unary()?;
                    left = Expr::Div(Box::new(left), Box::new(right));
                }
                _ => return Some(left),
            }
        }
    }

    fn parse_unary(&mut self) -> Option<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let inner = self.parse_unary()?;
                Some(Expr::Neg(Box::new(inner)))
            }
            Some(Token::Plus) => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Option<Expr> {
        let base = self.parse_primary()?;
        if self.peek() == Some(&Token::Caret) {
            self.advance();
            let exponent = self.parse_unary()?;
            return Some(Expr::Pow(Box::new(base), Box::new(exponent)));
        }
        Some(base)
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        match self.advance()? {
            Token::Num(value) => Some(Expr::Num(value)),
            Token::Ident(name) => match name.as_str() {
                "x" => Some(Expr::Var),
                "pi" => Some(Expr::Pi),
                "e" => Some(Expr::E),
                _ => {
                    let func = Func::from_name(&name)?;
                    self.expect(&Token::LParen)?;
                    let argument = self.parse_additive()?;
                    self.expect(&Token::RParen)?;
                    Some(Expr::Call(func, Box::new(argument)))
                }
            },
            Token::LParen => {
                let inner = self.parse_additive()?;
                self.expect(&Token::RParen)?;
                Some(inner)
            }
            _ => None,
        }
    }
}

/// Parses an already-normalized formula fragment. `None` means the fragment
/// is outside the supported grammar; callers treat that as "do not attempt".
pub fn parse(input: &str) -> Option<Expr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return None;
    }
    let mut parser = Parser {
        tokens,
        position: 0,
    };
    let expr = parser.parse_additive()?;
    if parser.position != parser.tokens.len() {
        return None;
    }
    Some(expr)
}

impl Expr {
    /// Numeric evaluation at `x`. Non-finite intermediate results poison the
    /// whole evaluation.
    pub fn eval(&self, x: f64) -> Option<f64> {
        let value = match self {
            Self::Num(value) => *value,
            Self::Var => x,
            Self::Pi => std::f64::consts::PI,
            Self::E => std::f64::consts::E,
            Self::Add(a, b) => a.eval(x)? + b.eval(x)?,
            Self::Sub(a, b) => a.eval(x)? - b.eval(x)?,
            Self::Mul(a, b) => a.eval(x)? * b.eval(x)?,
            Self::Div(a, b) => a.eval(x)? / b.eval(x)?,
            Self::Pow(a, b) => a.eval(x)?.powf(b.eval(x)?),
            Self::Neg(a) => -a.eval(x)?,
            Self::Call(func, argument) => {
                let argument = argument.eval(x)?;
                match func {
                    Func::Sin => argument.sin(),
                    Func::Cos => argument.cos(),
                    Func::Tan => argument.tan(),
                    Func::Ln => argument.ln(),
                    Func::Sqrt => argument.sqrt(),
                    Func::Exp => argument.exp(),
                }
            }
        };
        value.is_finite().then_some(value)
    }

    pub fn contains_var(&self) -> bool {
        match self {
            Self::Num(_) | Self::Pi | Self::E => false,
            Self::Var => true,
            Self::Add(a, b) | Self::Sub(a, b) | Self::Mul(a, b) | Self::Div(a, b)
            | Self::Pow(a, b) => a.contains_var() || b.contains_var(),
            Self::Neg(a) => a.contains_var(),
            Self::Call(_, a) => a.contains_var(),
        }
    }

    /// Symbolic derivative with respect to `x`, for the rule set the
    /// verifier needs. `None` marks an unsupported form.
    pub fn differentiate(&self) -> Option<Expr> {
        let derivative = match self {
            Self::Num(_) | Self::Pi | Self::E => Self::Num(0.0),
            Self::Var => Self::Num(1.0),
            Self::Add(a, b) => Self::Add(Box::new(a.differentiate()?), Box::new(b.differentiate()?)),
            Self::Sub(a, b) => Self::Sub(Box::new(a.differentiate()?), Box::new(b.differentiate()?)),
            Self::Mul(a, b) => Self::Add(
                Box::new(Self::Mul(Box::new(a.differentiate()?), b.clone())),
                Box::new(Self::Mul(a.clone(), Box::new(b.differentiate()?))),
            ),
            Self::Div(a, b) => Self::Div(
                Box::new(Self::Sub(
                    Box::new(Self::Mul(Box::new(a.differentiate()?), b.clone())),
                    Box::new(Self::Mul(a.clone(), Box::new(b.differentiate()?))),
                )),
                Box::new(Self::Pow(b.clone(), Box::new(Self::Num(2.0)))),
            ),
            Self::Pow(base, exponent) => {
                if !exponent.contains_var() {
                    // Power rule with constant exponent.
                    Self::Mul(
                        Box::new(Self::Mul(
                            exponent.clone(),
                            Box::new(Self::Pow(
                                base.clone(),
                                Box::new(Self::Sub(exponent.clone(), Box::new(Self::Num(1.0)))),
                            )),
                        )),
                        Box::new(base.differentiate()?),
                    )
                } else if !base.contains_var() {
                    // Exponential with constant base: a^u * ln(a) * u'.
                    Self::Mul(
                        Box::new(Self::Mul(
                            Box::new(self.clone()),
                            Box::new(Self::Call(Func::Ln, base.clone())),
                        )),
                        Box::new(exponent.differentiate()?),
                    )
                } else {
                    return None;
                }
            }
            Self::Neg(a) => Self::Neg(Box::new(a.differentiate()?)),
            Self::Call(func, argument) => {
                let inner = argument.differentiate()?;
                let outer = match func {
                    Func::Sin => Self::Call(Func::Cos, argument.clone()),
                    Func::Cos => Self::Neg(Box::new(Self::Call(Func::Sin, argument.clone()))),
                    Func::Tan => Self::Div(
                        Box::new(Self::Num(1.0)),
                        Box::new(Self::Pow(
                            Box::new(Self::Call(Func::Cos, argument.clone())),
                            Box::new(Self::Num(2.0)),
                        )),
                    ),
                    Func::Ln => Self::Div(Box::new(Self::Num(1.0)), argument.clone()),
                    Func::Sqrt => Self::Div(
                        Box::new(Self::Num(1.0)),
                        Box::new(Self::Mul(
                            Box::new(Self::Num(2.0)),
                            Box::new(Self::Call(Func::Sqrt, argument.clone())),
                        )),
                    ),
                    Func::Exp => Self::Call(Func::Exp, argument.clone()),
                };
                Self::Mul(Box::new(outer), Box::new(inner))
            }
        };
        Some(derivative)
    }

    /// Constant folding plus the identity rules the verifier relies on.
    pub fn simplify(&self) -> Expr {
        match self {
            Self::Add(a, b) => {
                let (a, b) = (a.simplify(), b.simplify());
                match (&a, &b) {
                    (Self::Num(x), Self::Num(y)) => Self::Num(x + y),
                    (Self::Num(zero), _) if *zero == 0.0 => b,
                    (_, Self::Num(zero)) if *zero == 0.0 => a,
                    _ => Self::Add(Box::new(a), Box::new(b)),
                }
            }
            Self::Sub(a, b) => {
                let (a, b) = (a.simplify(), b.simplify());
                match (&a, &b) {
                    (Self::Num(x), Self::Num(y)) => Self::Num(x - y),
                    (_, Self::Num(zero)) if *zero == 0.0 => a,
                    _ if a == b => Self::Num(0.0),
                    _ => Self::Sub(Box::new(a), Box::new(b)),
                }
            }
            Self::Mul(a, b) => {
                let (a, b) = (a.simplify(), b.simplify());
                match (&a, &b) {
                    (Self::Num(x), Self::Num(y)) => Self::Num(x * y),
                    (Self::Num(zero), _) | (_, Self::Num(zero)) if *zero == 0.0 => Self::Num(0.0),
                    (Self::Num(one), _) if *one == 1.0 => b,
                    (_, Self::Num(one)) if *one == 1.0 => a,
                    _ => Self::Mul(Box::new(a), Box::new(b)),
                }
            }
            Self::Div(a, b) => {
                let (a, b) = (a.simplify(), b.simplify());
                match (&a, &b) {
                    (Self::Num(x), Self::Num(y)) if *y != 0.0 => Self::Num(x / y),
                    (Self::Num(zero), _) if *zero == 0.0 => Self::Num(0.0),
                    (_, Self::Num(one)) if *one == 1.0 => a,
                    _ => Self::Div(Box::new(a), Box::new(b)),
                }
            }
            Self::Pow(a, b) => {
                let (a, b) = (a.simplify(), b.simplify());
                match (&a, &b) {
                    (Self::Num(x), Self::Num(y)) => {
                        let value = x.powf(*y);
                        if value.is_finite() {
                            Self::Num(value)
                        } else {
                            Self::Pow(Box::new(a), Box::new(b))
                        }
                    }
                    (_, Self::Num(one)) if *one == 1.0 => a,
                    (_, Self::Num(zero)) if *zero == 0.0 => Self::Num(1.0),
                    _ => Self::Pow(Box::new(a), Box::new(b)),
                }
            }
            Self::Neg(a) => {
                let a = a.simplify();
                match a {
                    Self::Num(value) => Self::Num(-value),
                    _ => Self::Neg(Box::new(a)),
                }
            }
            Self::Call(func, argument) => Self::Call(*func, Box::new(argument.simplify())),
            other => other.clone(),
        }
    }
}

const SAMPLE_POINTS: [f64; 8] = [-3.7, -2.9, -1.3, -0.41, 0.37, 1.23, 2.11, 3.67];
const EQUALITY_TOLERANCE: f64 = 1e-6;
const MIN_SAMPLE_POINTS: usize = 4;

/// Decides whether two expressions agree: first by simplifying their
/// difference, then by comparing values on a fixed deterministic grid.
/// `None` means the grid could not decide (too few shared defined points).
pub fn equivalent(a: &Expr, b: &Expr) -> Option<bool> {
    let difference = Expr::Sub(Box::new(a.clone()), Box::new(b.clone())).simplify();
    if let Expr::Num(value) = difference {
        return Some(value.abs() <= EQUALITY_TOLERANCE);
    }

    let mut valid = 0;
    for x in SAMPLE_POINTS {
        let (Some(left), Some(right)) = (a.eval(x), b.eval(x)) else {
            continue;
        };
        let scale = 1.0 + left.abs().max(right.abs());
        if (left - right).abs() > EQUALITY_TOLERANCE * scale {
            return Some(false);
        }
        valid += 1;
    }

    (valid >= MIN_SAMPLE_POINTS).then_some(true)
}

/// Composite Simpson evaluation of a definite integral. `None` when the
/// integrand is undefined anywhere on the grid.
pub fn integrate_numeric(expr: &Expr, lower: f64, upper: f64) -> Option<f64> {
    const STEPS: usize = 512; // even

    if !lower.is_finite() || !upper.is_finite() {
        return None;
    }
    if (upper - lower).abs() < f64::EPSILON {
        return Some(0.0);
    }

    let h = (upper - lower) / STEPS as f64;
    let mut sum = expr.eval(lower)? + expr.eval(upper)?;
    for step in 1..STEPS {
        let x = lower + h * step as f64;
        let weight = if step % 2 == 1 { 4.0 } else { 2.0 };
        sum += weight * expr.eval(x)?;
    }

    let value = sum * h / 3.0;
    value.is_finite().then_some(value)
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LimitValue {
    Finite(f64),
    PosInfinite,
    NegInfinite,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LimitPoint {
    Finite(f64),
    PosInfinity,
    NegInfinity,
}

const APPROACH_OFFSETS: [f64; 4] = [1e-2, 1e-3, 1e-4, 1e-5];
const FAR_ABSCISSAE: [f64; 4] = [1e3, 1e4, 1e5, 1e6];
const DIVERGENCE_MAGNITUDE: f64 = 1e6;

/// Numeric limit along a fixed approach sequence. Bounded by construction;
/// `None` when the approach values neither settle nor diverge cleanly.
pub fn numeric_limit(expr: &Expr, point: LimitPoint) -> Option<LimitValue> {
    match point {
        LimitPoint::Finite(at) => {
            let above: Vec<f64> = APPROACH_OFFSETS.iter().map(|h| at + h).collect();
            let below: Vec<f64> = APPROACH_OFFSETS.iter().map(|h| at - h).collect();
            let upper = approach_estimate(expr, &above);
            let lower = approach_estimate(expr, &below);
            match (lower, upper) {
                (Some(a), Some(b)) => combine_sides(a, b),
                (Some(single), None) | (None, Some(single)) => Some(single),
                (None, None) => None,
            }
        }
        LimitPoint::PosInfinity => approach_estimate(expr, &FAR_ABSCISSAE),
        LimitPoint::NegInfinity => {
            let xs: Vec<f64> = FAR_ABSCISSAE.iter().map(|x| -x).collect();
            approach_estimate(expr, &xs)
        }
    }
}

fn approach_estimate(expr: &Expr, xs: &[f64]) -> Option<LimitValue> {
    let values: Vec<f64> = xs.iter().filter_map(|x| expr.eval(*x)).collect();
    if values.len() < 2 {
        return None;
    }

    let last = values[values.len() - 1];
    let previous = values[values.len() - 2];

    // Divergence keeps its sign; an approach that flips sign while
    // growing is not a clean one-sided divergence.
    if last.abs() > DIVERGENCE_MAGNITUDE && last.abs() > previous.abs() && last * previous > 0.0 {
        return Some(if last > 0.0 {
            LimitValue::PosInfinite
        } else {
            LimitValue::NegInfinite
        });
    }

    let scale = 1.0 + last.abs();
    ((last - previous).abs() <= 1e-3 * scale).then_some(LimitValue::Finite(last))
}

fn combine_sides(a: LimitValue, b: LimitValue) -> Option<LimitValue> {
    match (a, b) {
        (LimitValue::Finite(left), LimitValue::Finite(right)) => {
            let scale = 1.0 + left.abs().max(right.abs());
            ((left - right).abs() <= 1e-2 * scale).then_some(LimitValue::Finite((left + right) / 2.0))
        }
        (LimitValue::PosInfinite, LimitValue::PosInfinite) => Some(LimitValue::PosInfinite),
        (LimitValue::NegInfinite, LimitValue::NegInfinite) => Some(LimitValue::NegInfinite),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(input: &str) -> Expr {
        parse(input).unwrap_or_else(|| panic!("should parse: {input}"))
    }

    #[test]
    fn parses_and_evaluates_polynomials() {
        let expr = parsed("x^2 - 4");
        assert_eq!(expr.eval(2.0), Some(0.0));
        assert_eq!(expr.eval(3.0), Some(5.0));
    }

    #[test]
    fn power_is_right_associative() {
        // 2^3^2 = 2^(3^2) = 512
        assert_eq!(parsed("2^3^2").eval(0.0), Some(512.0));
    }

    #[test]
    fn unary_minus_binds_tighter_than_subtraction() {
        assert_eq!(parsed("-x^2").eval(2.0), Some(-4.0));
        assert_eq!(parsed("3 - -2").eval(0.0), Some(5.0));
    }

    #[test]
    fn unknown_identifiers_are_rejected() {
        assert!(parse("y + 1").is_none());
        assert!(parse("foo(x)").is_none());
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        assert!(parse("x + 1 )").is_none());
    }

    #[test]
    fn constants_evaluate() {
        let expr = parsed("sin(pi)");
        let value = expr.eval(0.0).expect("defined");
        assert!(value.abs() < 1e-12);
        assert!((parsed("e").eval(0.0).unwrap() - std::f64::consts::E).abs() < 1e-12);
    }

    #[test]
    fn derivative_of_polynomial() {
        let derivative = parsed("x^3 + 2*x").differentiate().expect("supported");
        let expected = parsed("3*x^2 + 2");
        assert_eq!(equivalent(&derivative, &expected), Some(true));
    }

    #[test]
    fn derivative_with_chain_rule() {
        let derivative = parsed("sin(x^2)").differentiate().expect("supported");
        let expected = parsed("2*x*cos(x^2)");
        assert_eq!(equivalent(&derivative, &expected), Some(true));
    }

    #[test]
    fn derivative_of_constant_base_exponential() {
        let derivative = parsed("2^x").differentiate().expect("supported");
        let expected = parsed("2^x * ln(2)");
        assert_eq!(equivalent(&derivative, &expected), Some(true));
    }

    #[test]
    fn general_power_is_unsupported() {
        assert!(parsed("x^x").differentiate().is_none());
    }

    #[test]
    fn simplify_folds_constants() {
        assert_eq!(parsed("2*3 + 1").simplify(), Expr::Num(7.0));
        assert_eq!(parsed("x*0").simplify(), Expr::Num(0.0));
        assert_eq!(parsed("x^1").simplify(), Expr::Var);
    }

    #[test]
    fn equivalent_accepts_identities_and_rejects_differences() {
        assert_eq!(
            equivalent(&parsed("(x+1)^2"), &parsed("x^2 + 2*x + 1")),
            Some(true)
        );
        assert_eq!(equivalent(&parsed("x^2"), &parsed("x^2 + 1")), Some(false));
    }

    #[test]
    fn equivalence_is_undecided_without_enough_defined_points() {
        // Both sides are undefined on the whole sample grid.
        assert_eq!(
            equivalent(&parsed("ln(x - 100)"), &parsed("sqrt(x - 100)")),
            None
        );
    }

    #[test]
    fn simpson_integrates_a_parabola() {
        let value = integrate_numeric(&parsed("x^2"), 0.0, 3.0).expect("defined");
        assert!((value - 9.0).abs() < 1e-6);
    }

    #[test]
    fn simpson_rejects_singular_integrand() {
        assert!(integrate_numeric(&parsed("1/x"), -1.0, 1.0).is_none());
    }

    #[test]
    fn numeric_limit_of_sinx_over_x() {
        let limit = numeric_limit(&parsed("sin(x)/x"), LimitPoint::Finite(0.0));
        match limit {
            Some(LimitValue::Finite(value)) => assert!((value - 1.0).abs() < 1e-3),
            other => panic!("unexpected limit {other:?}"),
        }
    }

    #[test]
    fn numeric_limit_detects_divergence() {
        let limit = numeric_limit(&parsed("1/x^2"), LimitPoint::Finite(0.0));
        assert_eq!(limit, Some(LimitValue::PosInfinite));
    }

    #[test]
    fn numeric_limit_divergence_keeps_its_sign() {
        let limit = numeric_limit(&parsed("-1/x^2"), LimitPoint::Finite(0.0));
        assert_eq!(limit, Some(LimitValue::NegInfinite));
    }

    #[test]
    fn numeric_limit_at_infinity() {
        let limit = numeric_limit(&parsed("(2*x+1)/x"), LimitPoint::PosInfinity);
        match limit {
            Some(LimitValue::Finite(value)) => assert!((value - 2.0).abs() < 1e-2),
            other => panic!("unexpected limit {other:?}"),
        }
    }
}
