//! Evaluation of Mal forms.
//!
//! [`eval`] is a trampoline over two loop variables, the form being evaluated and
//! the environment it is evaluated in. Special forms in tail position and calls to
//! user functions hand back a [`Step::Continue`] instead of recursing, so the host
//! stack only grows with the nesting of non-tail sub-evaluations. That nesting is
//! bounded by [`MAX_EVAL_DEPTH`] through a thread-local guard, which builtin
//! callbacks re-entering the evaluator (`apply`, `map`, `swap!`, `eval`) share.

mod environment;
pub mod intooperation;

pub use environment::Environment;
pub use intooperation::{NumIter, ValueIter};

use crate::ast::{Lambda, Map, Value};
use crate::builtinops::builtin_ops;
use crate::reader::read_all;
use crate::{Arity, Error, MAX_EVAL_DEPTH};
use tracing::{debug, trace};
use std::cell::Cell;
use std::rc::Rc;

/// Value of `*host-language*`
pub const HOST_LANGUAGE: &str = "malrs";

/// Definitions written in Mal itself, evaluated into every global environment
const PRELUDE: &str = include_str!("prelude.mal");

thread_local! {
    static EVAL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Counts one level of nested evaluation for as long as it is alive
struct EvalDepthGuard;

impl EvalDepthGuard {
    fn new() -> Result<Self, Error> {
        let depth = EVAL_DEPTH.with(|d| {
            let depth = d.get() + 1;
            d.set(depth);
            depth
        });
        let guard = EvalDepthGuard;
        if depth > MAX_EVAL_DEPTH {
            return Err(Error::EvalError(format!(
                "Stack overflow: maximum recursion depth exceeded (max: {MAX_EVAL_DEPTH})"
            )));
        }
        Ok(guard)
    }
}

impl Drop for EvalDepthGuard {
    fn drop(&mut self) {
        EVAL_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Outcome of one trampoline iteration
enum Step {
    /// Evaluation finished with this value
    Return(Value),
    /// Evaluate this form in this environment next, in place of the current one
    Continue(Value, Environment),
}

/// Forms dispatched on the literal text of their head symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecialForm {
    Def,
    DefMacro,
    Let,
    Do,
    If,
    Fn,
    Quote,
    Quasiquote,
    QuasiquoteExpand,
    Macroexpand,
    Try,
}

impl SpecialForm {
    fn from_symbol(name: &str) -> Option<Self> {
        Some(match name {
            "def!" => SpecialForm::Def,
            "defmacro!" => SpecialForm::DefMacro,
            "let*" => SpecialForm::Let,
            "do" => SpecialForm::Do,
            "if" => SpecialForm::If,
            "fn*" => SpecialForm::Fn,
            "quote" => SpecialForm::Quote,
            "quasiquote" => SpecialForm::Quasiquote,
            "quasiquoteexpand" => SpecialForm::QuasiquoteExpand,
            "macroexpand" => SpecialForm::Macroexpand,
            "try*" => SpecialForm::Try,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            SpecialForm::Def => "def!",
            SpecialForm::DefMacro => "defmacro!",
            SpecialForm::Let => "let*",
            SpecialForm::Do => "do",
            SpecialForm::If => "if",
            SpecialForm::Fn => "fn*",
            SpecialForm::Quote => "quote",
            SpecialForm::Quasiquote => "quasiquote",
            SpecialForm::QuasiquoteExpand => "quasiquoteexpand",
            SpecialForm::Macroexpand => "macroexpand",
            SpecialForm::Try => "try*",
        }
    }

    fn arity_error(self, expected: Arity, got: usize) -> Error {
        Error::form_arity_error(self.name(), expected, got)
    }
}

/// Evaluate a form in `env`
pub fn eval(ast: &Value, env: &Environment) -> Result<Value, Error> {
    let _guard = EvalDepthGuard::new()?;

    let mut ast = ast.clone();
    let mut env = env.clone();

    loop {
        ast = macroexpand(ast, &env)?;

        let step = match &ast {
            Value::List(items, _) => match items.split_first() {
                None => return Ok(ast.clone()),
                Some((head, args)) => eval_application(head, args, &env)?,
            },
            _ => return eval_ast(&ast, &env),
        };

        match step {
            Step::Return(value) => return Ok(value),
            Step::Continue(next, next_env) => {
                trace!("tail: {next}");
                ast = next;
                env = next_env;
            }
        }
    }
}

fn eval_application(head: &Value, args: &[Value], env: &Environment) -> Result<Step, Error> {
    if let Value::Symbol(name) = head
        && let Some(form) = SpecialForm::from_symbol(name)
    {
        return eval_special_form(form, args, env);
    }

    let f = eval(head, env)?;
    let args = eval_each(args, env)?;

    match f {
        Value::Function(lambda) => {
            let call_env = lambda.bind_arguments(args)?;
            Ok(Step::Continue(lambda.body.clone(), call_env))
        }
        Value::BuiltinFunction { func, .. } => func(args).map(Step::Return),
        // A head that is not callable leaves the evaluated list as the result
        other => {
            let mut items = Vec::with_capacity(args.len() + 1);
            items.push(other);
            items.extend(args);
            Ok(Step::Return(Value::list(items)))
        }
    }
}

fn eval_special_form(form: SpecialForm, args: &[Value], env: &Environment) -> Result<Step, Error> {
    match form {
        SpecialForm::Def | SpecialForm::DefMacro => eval_def(form, args, env).map(Step::Return),
        SpecialForm::Let => eval_let(args, env),
        SpecialForm::Do => eval_do(args, env),
        SpecialForm::If => eval_if(args, env),
        SpecialForm::Fn => eval_fn(args, env).map(Step::Return),
        SpecialForm::Quote => single_operand(form, args).map(|x| Step::Return(x.clone())),
        SpecialForm::Quasiquote => {
            let expanded = quasiquote(single_operand(form, args)?);
            Ok(Step::Continue(expanded, env.clone()))
        }
        SpecialForm::QuasiquoteExpand => {
            single_operand(form, args).map(|x| Step::Return(quasiquote(x)))
        }
        SpecialForm::Macroexpand => {
            let form = single_operand(form, args)?.clone();
            macroexpand(form, env).map(Step::Return)
        }
        SpecialForm::Try => eval_try(args, env),
    }
}

fn single_operand(form: SpecialForm, args: &[Value]) -> Result<&Value, Error> {
    match args {
        [operand] => Ok(operand),
        _ => Err(form.arity_error(Arity::Exact(1), args.len())),
    }
}

fn symbol_name<'a>(form: SpecialForm, value: &'a Value) -> Result<&'a str, Error> {
    match value {
        Value::Symbol(name) => Ok(name),
        other => Err(Error::TypeError(format!(
            "'{}' expects a symbol, got {}",
            form.name(),
            other.type_name()
        ))),
    }
}

/// `def!` and `defmacro!`: bind in the current frame and return the value
fn eval_def(form: SpecialForm, args: &[Value], env: &Environment) -> Result<Value, Error> {
    let [name, expr] = args else {
        return Err(form.arity_error(Arity::Exact(2), args.len()));
    };
    let name = symbol_name(form, name)?;

    let value = match eval(expr, env)? {
        // Macros are copies; the evaluated function itself is left unchanged
        Value::Function(lambda) if form == SpecialForm::DefMacro => {
            Value::Function(Rc::new(lambda.to_macro()))
        }
        value => value,
    };

    env.set(name, value.clone());
    Ok(value)
}

fn eval_let(args: &[Value], env: &Environment) -> Result<Step, Error> {
    let [bindings, body] = args else {
        return Err(SpecialForm::Let.arity_error(Arity::Exact(2), args.len()));
    };
    let bindings = bindings.as_sequence()?;
    if bindings.len() % 2 != 0 {
        return Err(Error::EvalError(
            "'let*' requires an even number of binding forms".into(),
        ));
    }

    // Each binding sees the ones before it
    let child = Environment::with_parent(env);
    for pair in bindings.chunks_exact(2) {
        let name = symbol_name(SpecialForm::Let, &pair[0])?;
        let value = eval(&pair[1], &child)?;
        child.set(name, value);
    }

    Ok(Step::Continue(body.clone(), child))
}

fn eval_do(args: &[Value], env: &Environment) -> Result<Step, Error> {
    let Some((last, init)) = args.split_last() else {
        return Err(SpecialForm::Do.arity_error(Arity::AtLeast(1), 0));
    };
    for expr in init {
        eval(expr, env)?;
    }
    Ok(Step::Continue(last.clone(), env.clone()))
}

fn eval_if(args: &[Value], env: &Environment) -> Result<Step, Error> {
    let (condition, then_branch, else_branch) = match args {
        [condition, then_branch] => (condition, then_branch, None),
        [condition, then_branch, else_branch] => (condition, then_branch, Some(else_branch)),
        _ => return Err(SpecialForm::If.arity_error(Arity::Range(2, 3), args.len())),
    };

    let branch = if eval(condition, env)?.is_truthy() {
        then_branch
    } else {
        match else_branch {
            Some(else_branch) => else_branch,
            None => return Ok(Step::Return(Value::Nil)),
        }
    };
    Ok(Step::Continue(branch.clone(), env.clone()))
}

fn eval_fn(args: &[Value], env: &Environment) -> Result<Value, Error> {
    let [params, body] = args else {
        return Err(SpecialForm::Fn.arity_error(Arity::Exact(2), args.len()));
    };

    let params = params
        .as_sequence()?
        .iter()
        .map(|param| symbol_name(SpecialForm::Fn, param).map(str::to_owned))
        .collect::<Result<Rc<[String]>, Error>>()?;

    if let Some(marker) = params.iter().position(|p| p == "&")
        && params.len() != marker + 2
    {
        return Err(Error::EvalError(
            "'fn*' expects exactly one parameter name after '&'".into(),
        ));
    }

    Ok(Value::Function(Rc::new(Lambda {
        params,
        body: body.clone(),
        env: env.clone(),
        is_macro: false,
        meta: None,
    })))
}

/// `(try* EXPR (catch* SYM HANDLER))`.
///
/// Unless the protected expression is followed by exactly one well-formed catch clause, it is
/// evaluated on its own and its errors propagate.
fn eval_try(args: &[Value], env: &Environment) -> Result<Step, Error> {
    let Some(protected) = args.first() else {
        return Ok(Step::Return(Value::Nil));
    };
    let clause = match args {
        [_, clause] => catch_clause(clause),
        _ => None,
    };
    let Some((name, handler)) = clause else {
        return Ok(Step::Continue(protected.clone(), env.clone()));
    };

    match eval(protected, env) {
        Ok(value) => Ok(Step::Return(value)),
        Err(err) => {
            debug!("try* caught: {err}");
            let caught = match err {
                Error::Thrown(value) => value,
                other => Value::String(other.to_string()),
            };
            let handler_env = Environment::with_parent(env);
            handler_env.set(name, caught);
            Ok(Step::Continue(handler.clone(), handler_env))
        }
    }
}

fn catch_clause(clause: &Value) -> Option<(&str, &Value)> {
    match clause {
        Value::List(items, _) => match items.as_slice() {
            [Value::Symbol(head), Value::Symbol(name), handler] if head == "catch*" => {
                Some((name.as_str(), handler))
            }
            _ => None,
        },
        _ => None,
    }
}

fn eval_each(items: &[Value], env: &Environment) -> Result<Vec<Value>, Error> {
    items.iter().map(|item| eval(item, env)).collect()
}

/// Evaluate a form that is not a function application
fn eval_ast(ast: &Value, env: &Environment) -> Result<Value, Error> {
    match ast {
        Value::Symbol(name) => env.get(name),
        Value::List(items, _) => eval_each(items, env).map(Value::list),
        Value::Vector(items, _) => eval_each(items, env).map(Value::vector),
        Value::HashMap(map, _) => map
            .iter()
            .map(|(key, value)| eval(value, env).map(|value| (key.clone(), value)))
            .collect::<Result<Map, Error>>()
            .map(Value::hash_map),
        other => Ok(other.clone()),
    }
}

/// The macro and unevaluated arguments of `ast`, if it is a macro call
fn macro_call(ast: &Value, env: &Environment) -> Option<(Rc<Lambda>, Vec<Value>)> {
    let Value::List(items, _) = ast else {
        return None;
    };
    let (Value::Symbol(name), args) = items.split_first()? else {
        return None;
    };
    match env.get(name).ok()? {
        Value::Function(lambda) if lambda.is_macro => Some((lambda, args.to_vec())),
        _ => None,
    }
}

/// Expand `ast` until its head is no longer a macro
pub fn macroexpand(mut ast: Value, env: &Environment) -> Result<Value, Error> {
    while let Some((lambda, args)) = macro_call(&ast, env) {
        let expanded = call_lambda(&lambda, args)?;
        debug!("macroexpand: {ast} => {expanded}");
        ast = expanded;
    }
    Ok(ast)
}

fn call_lambda(lambda: &Lambda, args: Vec<Value>) -> Result<Value, Error> {
    eval(&lambda.body, &lambda.bind_arguments(args)?)
}

/// Call a function value with already evaluated arguments
pub fn apply(f: &Value, args: Vec<Value>) -> Result<Value, Error> {
    match f {
        Value::Function(lambda) => call_lambda(lambda, args),
        Value::BuiltinFunction { func, .. } => func(args),
        other => Err(Error::TypeError(format!(
            "Cannot apply non-function: {other}"
        ))),
    }
}

/// Rewrite a quasiquoted form into the `cons`/`concat`/`vec` calls that build it
pub fn quasiquote(ast: &Value) -> Value {
    match ast {
        Value::List(items, _) => match items.as_slice() {
            [Value::Symbol(head), form, ..] if head == "unquote" => form.clone(),
            elements => quasiquote_elements(elements),
        },
        // Elements only: a leading `unquote` inside a vector is just a symbol
        Value::Vector(items, _) => {
            Value::list(vec![Value::symbol("vec"), quasiquote_elements(items)])
        }
        Value::Symbol(_) | Value::HashMap(..) => {
            Value::list(vec![Value::symbol("quote"), ast.clone()])
        }
        other => other.clone(),
    }
}

fn quasiquote_elements(elements: &[Value]) -> Value {
    elements
        .iter()
        .rev()
        .fold(Value::list(Vec::new()), |acc, element| {
            match splice_unquoted(element) {
                Some(form) => Value::list(vec![Value::symbol("concat"), form.clone(), acc]),
                None => Value::list(vec![Value::symbol("cons"), quasiquote(element), acc]),
            }
        })
}

fn splice_unquoted(element: &Value) -> Option<&Value> {
    if let Value::List(items, _) = element
        && let [Value::Symbol(head), form, ..] = items.as_slice()
        && head == "splice-unquote"
    {
        Some(form)
    } else {
        None
    }
}

/// Create the global environment with builtins, host bindings and the prelude
pub fn create_global_env() -> Result<Environment, Error> {
    create_global_env_with_argv(&[])
}

/// Like [`create_global_env`], binding `*ARGV*` to `argv`
pub fn create_global_env_with_argv(argv: &[String]) -> Result<Environment, Error> {
    let env = Environment::new();

    for op in builtin_ops() {
        env.define_builtin(op.id, op.func);
    }

    // `eval` always works in the root environment. The builtin lives inside that
    // environment, so it only holds a weak handle to it.
    let root = env.downgrade();
    env.register_builtin_operation::<_, (Value,)>("eval", move |form: Value| {
        let root = root
            .upgrade()
            .ok_or_else(|| Error::EvalError("eval: global environment was dropped".into()))?;
        eval(&form, &root)
    });

    env.set("*host-language*", Value::from(HOST_LANGUAGE));
    env.set(
        "*ARGV*",
        Value::list(argv.iter().map(|arg| Value::from(arg.as_str())).collect()),
    );

    for form in read_all(PRELUDE)? {
        eval(&form, &env)?;
    }

    Ok(env)
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::Error;
    use crate::ast::{NumberType, kw, nil, sym, val, vector};
    use crate::reader::read_str;

    fn read(input: &str) -> Value {
        read_str(input).unwrap().unwrap()
    }

    #[test]
    fn test_register_builtin_operation_add() {
        fn add(a: NumberType, b: NumberType) -> NumberType {
            a + b
        }
        let env = create_global_env().unwrap();
        env.register_builtin_operation::<_, (NumberType, NumberType)>("add2", add);
        assert_eq!(eval(&read("(add2 7 5)"), &env).unwrap(), val(12));
        assert!(matches!(
            eval(&read("(add2 7)"), &env),
            Err(Error::ArityError { .. })
        ));
    }

    #[test]
    fn test_register_builtin_operation_zero_arg() {
        fn forty_two() -> NumberType {
            42
        }

        let env = create_global_env().unwrap();
        env.register_builtin_operation::<_, ()>("forty-two", forty_two);
        assert_eq!(eval(&read("(forty-two)"), &env).unwrap(), val(42));
    }

    #[test]
    fn test_register_builtin_operation_sequence_param() {
        fn sum_list(nums: NumIter<'_>) -> NumberType {
            nums.sum()
        }

        let env = create_global_env().unwrap();
        env.register_builtin_operation::<_, (NumIter<'static>,)>("sum-list", sum_list);
        assert_eq!(eval(&read("(sum-list (list 1 2 3 4))"), &env).unwrap(), val(10));
        assert_eq!(eval(&read("(sum-list [5 5])"), &env).unwrap(), val(10));
        assert!(matches!(
            eval(&read("(sum-list (list 1 \"2\"))"), &env),
            Err(Error::TypeError(_))
        ));
    }

    #[test]
    fn test_register_variadic_builtin_operation_with_explicit_arity() {
        fn weighted_sum(weight: NumberType, nums: NumIter<'_>) -> NumberType {
            weight * nums.sum::<NumberType>()
        }

        let env = create_global_env().unwrap();
        env.register_variadic_builtin_operation::<_, (NumberType, NumIter<'static>)>(
            "weighted-sum",
            Arity::AtLeast(2),
            weighted_sum,
        );

        assert_eq!(eval(&read("(weighted-sum 2 1 2 3)"), &env).unwrap(), val(12));
        match eval(&read("(weighted-sum 2)"), &env).unwrap_err() {
            Error::ArityError {
                expected: Arity::AtLeast(2),
                got: 1,
                ..
            } => {}
            other => panic!("expected ArityError, got {other:?}"),
        }
    }

    #[test]
    fn test_register_builtin_function_slice() {
        fn count_args(args: &[Value]) -> Result<Value, Error> {
            Ok(Value::Number(args.len() as NumberType))
        }

        let env = create_global_env().unwrap();
        env.register_builtin_function("count-args", count_args);
        assert_eq!(eval(&read("(count-args 1 \"x\" nil)"), &env).unwrap(), val(3));
    }

    #[test]
    fn test_builtin_passed_as_value() {
        let env = create_global_env().unwrap();
        assert_eq!(eval(&read("((fn* (op a b c) (op a b c)) > 9 6 2)"), &env).unwrap(), val(true));
        assert_eq!(eval(&read("((fn* (op a b c) (op a b c)) > 9 6 7)"), &env).unwrap(), val(false));
    }

    /// Test result variants for comprehensive testing
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),           // Evaluation should succeed with this value
        SpecificError(&'static str), // Evaluation should fail with error containing this string
        Error,                       // Evaluation should fail (any error)
        Setup,                       // Evaluation should succeed (any value)
    }
    use TestResult::*;

    /// Macro for setup expressions whose value is not checked
    macro_rules! test_setup {
        ($expr:expr) => {
            ($expr, Setup)
        };
    }

    /// Test environment containing test cases that share state
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    /// Success case whose expected value is written as Mal source
    fn reads_as(source: &str) -> TestResult {
        EvalResult(read(source))
    }

    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let env = create_global_env().unwrap();

            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(input, expected, &env, &test_id);
            }
        }
    }

    /// Execute a single test case with detailed error reporting
    fn execute_test_case(input: &str, expected: &TestResult, env: &Environment, test_id: &str) {
        let expr = match read_str(input) {
            Ok(Some(expr)) => expr,
            other => panic!("{test_id}: unexpected read result for '{input}': {other:?}"),
        };

        match (eval(&expr, env), expected) {
            (Ok(actual), EvalResult(expected_val)) => {
                assert_eq!(actual, *expected_val, "{test_id}: '{input}'");
            }
            (Ok(_), Setup) | (Err(_), Error) => {}
            (Err(err), Setup) => {
                panic!("{test_id}: setup '{input}' failed: {err:?}");
            }
            (Err(e), SpecificError(expected_text)) => {
                let error_msg = format!("{e}");
                assert!(
                    error_msg.contains(expected_text),
                    "{test_id}: error should contain '{expected_text}', got: {error_msg}"
                );
            }
            (Ok(actual), Error) => {
                panic!("{test_id}: expected error for '{input}', got {actual:?}");
            }
            (Ok(actual), SpecificError(expected_text)) => {
                panic!("{test_id}: expected error containing '{expected_text}', got {actual:?}");
            }
            (Err(err), EvalResult(expected_val)) => {
                panic!("{test_id}: expected {expected_val:?} for '{input}', got error {err:?}");
            }
        }
    }

    fn run_comprehensive_tests(test_cases: Vec<(&'static str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let env = create_global_env().unwrap();
            let test_id = format!("#{}", i + 1);
            execute_test_case(input, expected, &env, &test_id);
        }
    }

    #[test]
    fn test_comprehensive_operations_data_driven() {
        let test_cases = vec![
            // === SELF-EVALUATING FORMS ===
            ("42", success(42)),
            ("-271", success(-271)),
            ("\"hello\"", success("hello")),
            ("nil", success(nil())),
            ("true", success(true)),
            (":kw", EvalResult(kw("kw"))),
            ("()", success(Vec::<Value>::new())),
            ("[1 (+ 1 1)]", EvalResult(vector([1, 2]))),
            ("(vector? [1 (+ 1 1)])", success(true)),
            ("{:a (+ 1 2) \"b\" [3]}", reads_as("{:a 3 \"b\" [3]}")),
            ("*host-language*", success("malrs")),
            ("*ARGV*", success(Vec::<Value>::new())),
            // === SYMBOL LOOKUP ===
            ("undefined-sym", SpecificError("'undefined-sym' not found")),
            ("(undefined-fn 1)", SpecificError("'undefined-fn' not found")),
            // === ARITHMETIC ===
            ("(+ 1 2)", success(3)),
            ("(+)", success(0)),
            ("(- 10 3 2)", success(5)),
            ("(- 5)", success(-5)),
            ("(* 2 3 4)", success(24)),
            ("(/ 7 2)", success(3)),
            ("(/ 1 0)", SpecificError("Division by zero")),
            ("(+ 9223372036854775807 1)", SpecificError("overflow")),
            ("(+ 1 \"2\")", Error),
            ("(< 1 2 3)", success(true)),
            ("(< 1 3 2)", success(false)),
            ("(= 1 1 1)", success(true)),
            // === DEF! ===
            ("(def! x 3)", success(3)),
            ("(def! 1 3)", SpecificError("expects a symbol")),
            ("(def! x)", SpecificError("'def!'")),
            // === LET* ===
            ("(let* (a 1 b (+ a 1)) b)", success(2)),
            ("(let* [a 1] a)", success(1)),
            ("(let* () 5)", success(5)),
            ("(let* (a) a)", SpecificError("even number")),
            ("(let* (1 2) 1)", Error),
            ("(let* (a 1))", SpecificError("'let*'")),
            // === DO ===
            ("(do 1 2 3)", success(3)),
            ("(do)", Error),
            // === IF: only nil and false are falsy ===
            ("(if 0 \"t\" \"f\")", success("t")),
            ("(if nil \"t\" \"f\")", success("f")),
            ("(if false \"t\" \"f\")", success("f")),
            ("(if \"\" \"t\" \"f\")", success("t")),
            ("(if () \"t\" \"f\")", success("t")),
            ("(if nil 1)", success(nil())),
            ("(if true 1)", success(1)),
            ("(if)", SpecificError("'if'")),
            // === FN* ===
            ("((fn* (a b) (+ a b)) 1 2)", success(3)),
            ("((fn* [a b] (- a b)) 5 2)", success(3)),
            ("((fn* (& xs) xs) 1 2)", success([1, 2])),
            ("((fn* (a & xs) (count xs)) 1)", success(0)),
            ("((fn* (a b) a) 1)", SpecificError("Number of binds")),
            ("(fn* (a &) a)", Error),
            ("(fn* (a 1) a)", Error),
            ("(((fn* (a) (fn* (b) (+ a b))) 5) 7)", success(12)),
            ("(fn? (fn* () 1))", success(true)),
            // === QUOTE ===
            ("(quote (1 (+ 2 3)))", reads_as("(1 (+ 2 3))")),
            ("'abc", EvalResult(sym("abc"))),
            ("(quote)", Error),
            // === QUASIQUOTE ===
            ("(quasiquote (1 (splice-unquote (list 2 3)) 4))", success([1, 2, 3, 4])),
            ("(let* (x 5) `(a ~x))", reads_as("(a 5)")),
            ("(let* (x 5) `(a x))", reads_as("(a x)")),
            ("`[1 ~(+ 1 1)]", EvalResult(vector([1, 2]))),
            ("(vector? `[1 ~(+ 1 1)])", success(true)),
            ("`[unquote 1]", reads_as("[unquote 1]")),
            ("`(1 ~@nil)", success([1])),
            ("`{\"a\" b}", reads_as("{\"a\" b}")),
            ("`7", success(7)),
            ("(quasiquoteexpand (a ~b))", reads_as("(cons (quote a) (cons b ()))")),
            ("(quasiquoteexpand [~@c])", reads_as("(vec (concat c ()))")),
            // === NON-CALLABLE HEADS ===
            ("(1 2 3)", success([1, 2, 3])),
            ("(\"a\" (+ 1 1))", success(vec![val("a"), val(2)])),
            // === TRY*/CATCH* ===
            ("(try* (throw {\"msg\" \"oops\"}) (catch* e (get e \"msg\")))", success("oops")),
            ("(try* (throw [1 2]) (catch* e (count e)))", success(2)),
            ("(try* undefined-x (catch* e e))", success("'undefined-x' not found")),
            ("(try* (nth (list 1) 5) (catch* e (string? e)))", success(true)),
            ("(try* 1 (catch* e 2))", success(1)),
            ("(try* 1 (catch e e))", success(1)),
            ("(try* (throw 1) 2)", Error),
            // Trailing operands make the clause malformed
            ("(try* (throw 1) (catch* e :caught) 99)", Error),
            ("(try* 5 (catch* e :caught) 99)", success(5)),
            ("(try* 7)", success(7)),
            ("(try*)", success(nil())),
            ("(throw \"raw\")", SpecificError("\"raw\"")),
            // === PRELUDE ===
            ("(not nil)", success(true)),
            ("(not 0)", success(false)),
            ("(cond false 1 true 2)", success(2)),
            ("(cond false 1)", success(nil())),
            ("(cond)", success(nil())),
            ("(cond true)", SpecificError("odd number of forms to cond")),
            // === EVAL ===
            ("(eval (list + 1 2))", success(3)),
            ("(eval '(let* (q 2) (* q q)))", success(4)),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    fn test_stateful_environments() {
        let environment_test_cases = vec![
            TestEnvironment(vec![
                test_setup!("(defmacro! unless (fn* (pred a b) (list 'if pred b a)))"),
                ("(unless false 7 8)", success(7)),
                ("(unless true 7 8)", success(8)),
                ("(macroexpand (unless a b c))", reads_as("(if a c b)")),
                ("(macroexpand (+ 1 2))", reads_as("(+ 1 2)")),
                ("(macro? unless)", success(true)),
                ("(fn? unless)", success(false)),
            ]),
            TestEnvironment(vec![
                test_setup!("(def! f (fn* (n) (if (= n 0) \"done\" (f (- n 1)))))"),
                ("(f 100000)", success("done")),
            ]),
            TestEnvironment(vec![
                test_setup!("(def! sum-to (fn* (n acc) (if (= n 0) acc (sum-to (- n 1) (+ acc n)))))"),
                ("(sum-to 50000 0)", success(1_250_025_000)),
            ]),
            TestEnvironment(vec![
                ("(def! x 1)", success(1)),
                ("(let* (x 2) x)", success(2)),
                ("x", success(1)),
                ("(do (def! y 5) y)", success(5)),
                ("((fn* () (def! z 9)))", success(9)),
                ("z", SpecificError("'z' not found")),
            ]),
            TestEnvironment(vec![
                test_setup!("(def! a (atom 1))"),
                ("(swap! a + 2)", success(3)),
                ("@a", success(3)),
                ("(reset! a 10)", success(10)),
                ("(deref a)", success(10)),
            ]),
            TestEnvironment(vec![
                test_setup!("(def! make-adder (fn* (n) (fn* (x) (+ x n))))"),
                test_setup!("(def! add5 (make-adder 5))"),
                ("(add5 10)", success(15)),
                ("(map add5 [1 2])", success([6, 7])),
            ]),
            TestEnvironment(vec![
                ("(eval '(def! zz 4))", success(4)),
                ("zz", success(4)),
                ("(let* (zz 1) (eval 'zz))", success(4)),
            ]),
            TestEnvironment(vec![
                test_setup!("(def! g (with-meta (fn* () 1) {:a 1}))"),
                ("(meta g)", reads_as("{:a 1}")),
                ("(g)", success(1)),
                test_setup!("(def! h (fn* () 2))"),
                ("(meta h)", success(nil())),
            ]),
            TestEnvironment(vec![
                test_setup!("(def! id (fn* (x) x))"),
                test_setup!("(defmacro! mid id)"),
                ("(macro? id)", success(false)),
                ("(macro? mid)", success(true)),
            ]),
            TestEnvironment(vec![
                test_setup!("(defmacro! five (fn* () 5))"),
                ("(five)", success(5)),
                ("(macroexpand (five))", success(5)),
                ("(let* (x (five)) (+ x 1))", success(6)),
            ]),
        ];

        run_tests_in_environment(environment_test_cases);
    }
}
