//! The Code-fragment Compiler: wraps embedded source text as
//! a callable, keyed in the compiled-fragment cache by
//! `(hash(source), namespace)`.
//!
//! The core only assumes an opaque "execute this string with three named
//! bindings" capability; it declares
//! the `FragmentExecutor` trait as the injection point and ships one
//! concrete, modest implementation — a small expression mini-language —
//! as the default, the way a template engine without an embedded
//! scripting VM typically does.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{self, GLOBAL_CACHE};
use crate::error::FragmentError;
use crate::value::Value;

/// The three contextual bindings every fragment sees.
pub struct FragmentContext<'a> {
    pub current_value: &'a Value,
    pub private_data: &'a Value,
    pub params: &'a HashMap<String, Value>,
}

/// An opaque compiled callable. Concrete executors decide what lives
/// inside; the core only ever invokes it back through the same executor
/// that produced it.
pub struct CompiledFragment {
    pub source: Arc<str>,
    program: Arc<dyn std::any::Any + Send + Sync>,
}

impl CompiledFragment {
    pub fn new(source: Arc<str>, program: Arc<dyn std::any::Any + Send + Sync>) -> Self {
        CompiledFragment { source, program }
    }
}

/// The injection point for fragment execution: the core declares a
/// trait and defers the actual choice of engine (scripting language,
/// expression mini-language, host-compiled plugin) to an implementation.
pub trait FragmentExecutor: Send + Sync {
    fn compile(&self, source: &str) -> Result<CompiledFragment, FragmentError>;
    fn invoke(
        &self,
        compiled: &CompiledFragment,
        ctx: &FragmentContext,
    ) -> Result<Value, FragmentError>;
}

/// Registry of namespace id -> executor: a
/// processor selects one namespace, so templates can embed fragments
/// written against whichever executor that namespace names.
#[derive(Clone)]
pub struct FragmentRegistry {
    executors: Arc<HashMap<String, Arc<dyn FragmentExecutor>>>,
}

impl FragmentRegistry {
    pub fn new() -> Self {
        let mut map: HashMap<String, Arc<dyn FragmentExecutor>> = HashMap::new();
        map.insert("expr".to_string(), Arc::new(expr::ExprFragmentExecutor));
        FragmentRegistry {
            executors: Arc::new(map),
        }
    }

    pub fn register(&mut self, namespace: impl Into<String>, executor: Arc<dyn FragmentExecutor>) {
        Arc::make_mut(&mut self.executors).insert(namespace.into(), executor);
    }

    pub fn get(&self, namespace: &str) -> Option<Arc<dyn FragmentExecutor>> {
        self.executors.get(namespace).cloned()
    }
}

impl Default for FragmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Compiles `source` under `namespace`, routing through the shared cache
/// unless `bypass` is set.
pub fn compile_cached(
    registry: &FragmentRegistry,
    namespace: &str,
    source: &str,
    bypass: bool,
) -> Result<Arc<CompiledFragment>, FragmentError> {
    let executor = registry
        .get(namespace)
        .ok_or_else(|| FragmentError(format!("unknown fragment namespace {namespace:?}")))?;

    if bypass {
        return executor.compile(source).map(Arc::new);
    }

    let key = (cache::content_hash(source.as_bytes()), namespace.to_string());
    // The cache's builder closure is infallible, so on a cache miss we
    // compile eagerly before touching the cache; a compile error never
    // enters the table.
    let compiled = executor.compile(source)?;
    let compiled = Arc::new(compiled);
    let (compiled, _hit) = GLOBAL_CACHE.get_or_insert_fragment(&key, || compiled.clone());
    Ok(compiled)
}

pub fn invoke(
    registry: &FragmentRegistry,
    namespace: &str,
    compiled: &CompiledFragment,
    ctx: &FragmentContext,
) -> Result<Value, FragmentError> {
    let executor = registry
        .get(namespace)
        .ok_or_else(|| FragmentError(format!("unknown fragment namespace {namespace:?}")))?;
    executor.invoke(compiled, ctx)
}

/// The default `expr` namespace: a small expression language covering
/// literals, list literals, identifier lookup against params/current
/// value, comparisons, boolean connectives, string concatenation, and a
/// `die(...)` builtin.
pub mod expr {
    use super::*;
    use std::any::Any;

    #[derive(Debug, Clone)]
    pub enum Expr {
        Str(String),
        Num(String),
        List(Vec<Expr>),
        Ident(String),
        CurrentValue,
        Not(Box<Expr>),
        Die(Box<Expr>),
        BinOp(Box<Expr>, Op, Box<Expr>),
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Op {
        Eq,
        Ne,
        Lt,
        Le,
        Gt,
        Ge,
        And,
        Or,
        Concat,
    }

    pub struct ExprFragmentExecutor;

    impl FragmentExecutor for ExprFragmentExecutor {
        fn compile(&self, source: &str) -> Result<CompiledFragment, FragmentError> {
            let expr = parse(source)?;
            let program: Arc<dyn Any + Send + Sync> = Arc::new(expr);
            Ok(CompiledFragment::new(Arc::from(source), program))
        }

        fn invoke(
            &self,
            compiled: &CompiledFragment,
            ctx: &FragmentContext,
        ) -> Result<Value, FragmentError> {
            let expr = compiled
                .program
                .downcast_ref::<Expr>()
                .ok_or_else(|| FragmentError("corrupt compiled fragment".to_string()))?;
            eval_expr(expr, ctx)
        }
    }

    fn eval_expr(e: &Expr, ctx: &FragmentContext) -> Result<Value, FragmentError> {
        match e {
            Expr::Str(s) => Ok(Value::scalar(s.clone())),
            Expr::Num(s) => Ok(Value::scalar(s.clone())),
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for it in items {
                    out.push(eval_expr(it, ctx)?);
                }
                Ok(Value::list(out))
            }
            Expr::CurrentValue => Ok(ctx.current_value.clone()),
            Expr::Ident(name) => Ok(ctx
                .params
                .get(name)
                .cloned()
                .unwrap_or(Value::None)),
            Expr::Not(inner) => {
                let v = eval_expr(inner, ctx)?;
                Ok(Value::scalar(if v.truthy() { "" } else { "1" }))
            }
            Expr::Die(inner) => {
                let v = eval_expr(inner, ctx)?;
                Err(FragmentError(v.render()))
            }
            Expr::BinOp(lhs, op, rhs) => {
                let l = eval_expr(lhs, ctx)?;
                match op {
                    Op::Concat => {
                        let r = eval_expr(rhs, ctx)?;
                        Ok(Value::scalar(format!("{}{}", l.render(), r.render())))
                    }
                    Op::And => {
                        if !l.truthy() {
                            Ok(l)
                        } else {
                            eval_expr(rhs, ctx)
                        }
                    }
                    Op::Or => {
                        if l.truthy() {
                            Ok(l)
                        } else {
                            eval_expr(rhs, ctx)
                        }
                    }
                    _ => {
                        let r = eval_expr(rhs, ctx)?;
                        let res = compare(&l.render(), *op, &r.render());
                        Ok(Value::scalar(if res { "1" } else { "" }))
                    }
                }
            }
        }
    }

    fn compare(l: &str, op: Op, r: &str) -> bool {
        let numeric = l.parse::<f64>().ok().zip(r.parse::<f64>().ok());
        if let Some((lf, rf)) = numeric {
            return match op {
                Op::Eq => lf == rf,
                Op::Ne => lf != rf,
                Op::Lt => lf < rf,
                Op::Le => lf <= rf,
                Op::Gt => lf > rf,
                Op::Ge => lf >= rf,
                _ => unreachable!(),
            };
        }
        match op {
            Op::Eq => l == r,
            Op::Ne => l != r,
            Op::Lt => l < r,
            Op::Le => l <= r,
            Op::Gt => l > r,
            Op::Ge => l >= r,
            _ => unreachable!(),
        }
    }

    /// A small recursive-descent parser over the expression grammar.
    /// Grammar (loosest to tightest): `or := and (|| and)*`,
    /// `and := cmp (&& cmp)*`, `cmp := concat ((== | != | < | <= | > | >=) concat)?`,
    /// `concat := unary (~ unary)*`, `unary := '!' unary | primary`,
    /// `primary := str | num | list | 'die' '(' or ')' | ident | '$_'`.
    pub fn parse(source: &str) -> Result<Expr, FragmentError> {
        let mut p = Parser {
            chars: source.chars().collect(),
            pos: 0,
        };
        p.skip_ws();
        if p.pos >= p.chars.len() {
            // A bare `<:/>` with no body is the current-value shorthand,
            // handled upstream in the evaluator before reaching here; an
            // empty non-shorthand fragment source just yields nothing.
            return Ok(Expr::CurrentValue);
        }
        let e = p.parse_or()?;
        p.skip_ws();
        if p.pos != p.chars.len() {
            return Err(FragmentError(format!(
                "unexpected trailing input in fragment: {:?}",
                source
            )));
        }
        Ok(e)
    }

    struct Parser {
        chars: Vec<char>,
        pos: usize,
    }

    impl Parser {
        fn peek(&self) -> Option<char> {
            self.chars.get(self.pos).copied()
        }

        fn skip_ws(&mut self) {
            while matches!(self.peek(), Some(c) if c.is_whitespace()) {
                self.pos += 1;
            }
        }

        fn eat(&mut self, s: &str) -> bool {
            self.skip_ws();
            let tail = &self.chars[self.pos..];
            let matches = s.chars().enumerate().all(|(i, c)| tail.get(i) == Some(&c));
            if matches {
                self.pos += s.chars().count();
            }
            matches
        }

        fn parse_or(&mut self) -> Result<Expr, FragmentError> {
            let mut lhs = self.parse_and()?;
            loop {
                self.skip_ws();
                if self.eat("||") {
                    let rhs = self.parse_and()?;
                    lhs = Expr::BinOp(Box::new(lhs), Op::Or, Box::new(rhs));
                } else {
                    break;
                }
            }
            Ok(lhs)
        }

        fn parse_and(&mut self) -> Result<Expr, FragmentError> {
            let mut lhs = self.parse_cmp()?;
            loop {
                self.skip_ws();
                if self.eat("&&") {
                    let rhs = self.parse_cmp()?;
                    lhs = Expr::BinOp(Box::new(lhs), Op::And, Box::new(rhs));
                } else {
                    break;
                }
            }
            Ok(lhs)
        }

        fn parse_cmp(&mut self) -> Result<Expr, FragmentError> {
            let lhs = self.parse_concat()?;
            self.skip_ws();
            let op = if self.eat("==") {
                Some(Op::Eq)
            } else if self.eat("!=") {
                Some(Op::Ne)
            } else if self.eat("<=") {
                Some(Op::Le)
            } else if self.eat(">=") {
                Some(Op::Ge)
            } else if self.eat("<") {
                Some(Op::Lt)
            } else if self.eat(">") {
                Some(Op::Gt)
            } else {
                None
            };
            match op {
                Some(op) => {
                    let rhs = self.parse_concat()?;
                    Ok(Expr::BinOp(Box::new(lhs), op, Box::new(rhs)))
                }
                None => Ok(lhs),
            }
        }

        fn parse_concat(&mut self) -> Result<Expr, FragmentError> {
            let mut lhs = self.parse_unary()?;
            loop {
                self.skip_ws();
                if self.eat("~") {
                    let rhs = self.parse_unary()?;
                    lhs = Expr::BinOp(Box::new(lhs), Op::Concat, Box::new(rhs));
                } else {
                    break;
                }
            }
            Ok(lhs)
        }

        fn parse_unary(&mut self) -> Result<Expr, FragmentError> {
            self.skip_ws();
            if self.eat("!") {
                return Ok(Expr::Not(Box::new(self.parse_unary()?)));
            }
            self.parse_primary()
        }

        fn parse_primary(&mut self) -> Result<Expr, FragmentError> {
            self.skip_ws();
            match self.peek() {
                Some('"') => self.parse_string(),
                Some('[') => self.parse_list(),
                Some('(') => {
                    self.pos += 1;
                    let inner = self.parse_or()?;
                    self.skip_ws();
                    if !self.eat(")") {
                        return Err(FragmentError("unbalanced parentheses".to_string()));
                    }
                    Ok(inner)
                }
                Some(c) if c == '$' => {
                    self.pos += 1;
                    if self.eat("_") {
                        Ok(Expr::CurrentValue)
                    } else {
                        let name = self.parse_ident_text();
                        Ok(Expr::Ident(name))
                    }
                }
                Some(c) if c.is_ascii_digit() || c == '-' => self.parse_number(),
                Some(c) if c.is_alphabetic() || c == '_' => {
                    let name = self.parse_ident_text();
                    if name == "die" {
                        self.skip_ws();
                        if !self.eat("(") {
                            // Bare `die "msg"` form, no parens.
                            let arg = self.parse_unary()?;
                            return Ok(Expr::Die(Box::new(arg)));
                        }
                        let arg = self.parse_or()?;
                        self.skip_ws();
                        if !self.eat(")") {
                            return Err(FragmentError("unbalanced parentheses in die()".to_string()));
                        }
                        Ok(Expr::Die(Box::new(arg)))
                    } else if name == "value" {
                        Ok(Expr::CurrentValue)
                    } else {
                        Ok(Expr::Ident(name))
                    }
                }
                other => Err(FragmentError(format!(
                    "unexpected character {:?} in fragment",
                    other
                ))),
            }
        }

        fn parse_ident_text(&mut self) -> String {
            let start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_' || c == '.') {
                self.pos += 1;
            }
            self.chars[start..self.pos].iter().collect()
        }

        fn parse_number(&mut self) -> Result<Expr, FragmentError> {
            let start = self.pos;
            if self.peek() == Some('-') {
                self.pos += 1;
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
                self.pos += 1;
            }
            Ok(Expr::Num(self.chars[start..self.pos].iter().collect()))
        }

        fn parse_string(&mut self) -> Result<Expr, FragmentError> {
            self.pos += 1; // opening quote
            let mut s = String::new();
            loop {
                match self.peek() {
                    None => return Err(FragmentError("unterminated string literal".to_string())),
                    Some('"') => {
                        self.pos += 1;
                        break;
                    }
                    Some('\\') => {
                        self.pos += 1;
                        match self.peek() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(c) => s.push(c),
                            None => return Err(FragmentError("dangling escape".to_string())),
                        }
                        self.pos += 1;
                    }
                    Some(c) => {
                        s.push(c);
                        self.pos += 1;
                    }
                }
            }
            Ok(Expr::Str(s))
        }

        fn parse_list(&mut self) -> Result<Expr, FragmentError> {
            self.pos += 1; // '['
            let mut items = Vec::new();
            self.skip_ws();
            if self.peek() == Some(']') {
                self.pos += 1;
                return Ok(Expr::List(items));
            }
            loop {
                items.push(self.parse_or()?);
                self.skip_ws();
                if self.eat(",") {
                    continue;
                }
                if self.eat("]") {
                    break;
                }
                return Err(FragmentError("expected ',' or ']' in list literal".to_string()));
            }
            Ok(Expr::List(items))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::collections::HashMap;

        fn ctx<'a>(params: &'a HashMap<String, Value>, current: &'a Value) -> FragmentContext<'a> {
            FragmentContext {
                current_value: current,
                private_data: &Value::None,
                params,
            }
        }

        #[test]
        fn evaluates_list_literal() {
            let exec = ExprFragmentExecutor;
            let compiled = exec.compile("[1,2,3]").unwrap();
            let params = HashMap::new();
            let cur = Value::None;
            let v = exec.invoke(&compiled, &ctx(&params, &cur)).unwrap();
            assert_eq!(
                v,
                Value::list(vec![
                    Value::scalar("1"),
                    Value::scalar("2"),
                    Value::scalar("3")
                ])
            );
        }

        #[test]
        fn die_builtin_raises() {
            let exec = ExprFragmentExecutor;
            let compiled = exec.compile("die \"boom\"").unwrap();
            let params = HashMap::new();
            let cur = Value::None;
            let err = exec.invoke(&compiled, &ctx(&params, &cur)).unwrap_err();
            assert_eq!(err.0, "boom");
        }

        #[test]
        fn bare_current_value_shorthand() {
            let expr = parse("").unwrap();
            assert!(matches!(expr, Expr::CurrentValue));
        }
    }
}
