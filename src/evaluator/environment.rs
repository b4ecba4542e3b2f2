use crate::ast::Value;
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};
use crate::{Arity, Error};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// Marks the parameter that collects the remaining arguments
const VARIADIC_MARKER: &str = "&";

/// Environment for variable bindings.
///
/// Environments form a chain through outer references. Frames are
/// shared: cloning an `Environment` yields another handle to the same
/// frame, which is how closures capture the scope they were defined in.
/// `set` only ever writes to the local frame.
#[derive(Clone, Default)]
pub struct Environment(Rc<Frame>);

#[derive(Default)]
struct Frame {
    bindings: RefCell<HashMap<String, Value>>,
    outer: Option<Environment>,
}

/// Non-owning handle, for builtins that must refer back to the
/// environment holding them
pub(crate) struct WeakEnvironment(Weak<Frame>);

impl WeakEnvironment {
    pub(crate) fn upgrade(&self) -> Option<Environment> {
        self.0.upgrade().map(Environment)
    }
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: &Environment) -> Self {
        Environment(Rc::new(Frame {
            bindings: RefCell::default(),
            outer: Some(parent.clone()),
        }))
    }

    /// Create a frame binding `binds` to `exprs` pairwise.
    ///
    /// A `&` in `binds` must be followed by exactly one name, which receives the
    /// remaining expressions as a list. Without it the counts must match.
    pub fn with_bindings(
        outer: Option<&Environment>,
        binds: &[String],
        mut exprs: Vec<Value>,
    ) -> Result<Self, Error> {
        let env = match outer {
            Some(outer) => Environment::with_parent(outer),
            None => Environment::new(),
        };

        let bad_arity = |exprs: usize| Error::BadEnvArity {
            binds: binds.len(),
            exprs,
        };

        match binds.iter().position(|name| name == VARIADIC_MARKER) {
            Some(marker) => {
                let [rest_name] = &binds[marker + 1..] else {
                    return Err(bad_arity(exprs.len()));
                };
                if exprs.len() < marker {
                    return Err(bad_arity(exprs.len()));
                }
                let rest = exprs.split_off(marker);
                env.bind_all(&binds[..marker], exprs);
                env.set(rest_name.as_str(), Value::list(rest));
            }
            None => {
                if binds.len() != exprs.len() {
                    return Err(bad_arity(exprs.len()));
                }
                env.bind_all(binds, exprs);
            }
        }

        Ok(env)
    }

    fn bind_all(&self, names: &[String], values: Vec<Value>) {
        let mut bindings = self.0.bindings.borrow_mut();
        for (name, value) in names.iter().zip(values) {
            bindings.insert(name.clone(), value);
        }
    }

    /// Bind `name` in this frame, overwriting any local binding
    pub fn set(&self, name: impl Into<String>, value: Value) -> &Self {
        self.0.bindings.borrow_mut().insert(name.into(), value);
        self
    }

    /// The nearest environment in the chain that binds `name`.
    /// Walks iteratively so deep call chains never recurse here.
    pub fn find(&self, name: &str) -> Option<Environment> {
        let mut current = self;
        loop {
            if current.0.bindings.borrow().contains_key(name) {
                return Some(current.clone());
            }
            current = current.0.outer.as_ref()?;
        }
    }

    fn get_local(&self, name: &str) -> Option<Value> {
        self.0.bindings.borrow().get(name).cloned()
    }

    pub fn get(&self, name: &str) -> Result<Value, Error> {
        self.find(name)
            .and_then(|env| env.get_local(name))
            .ok_or_else(|| Error::UnknownSymbol(name.to_owned()))
    }

    pub(crate) fn downgrade(&self) -> WeakEnvironment {
        WeakEnvironment(Rc::downgrade(&self.0))
    }

    pub(crate) fn define_builtin(&self, name: &str, func: Rc<OperationFn>) {
        self.set(name, Value::builtin(name, func));
    }

    /// Register a builtin that works on the raw argument slice.
    ///
    /// # Example
    /// ```
    /// use malrs::evaluator::create_global_env;
    /// use malrs::ast::Value;
    /// use malrs::Error;
    ///
    /// fn arg_count(args: &[Value]) -> Result<Value, Error> {
    ///     Ok(Value::Number(args.len() as i64))
    /// }
    ///
    /// let env = create_global_env().unwrap();
    /// env.register_builtin_function("arg-count", arg_count);
    /// assert_eq!(malrs::rep("(arg-count 1 2 3)", &env).unwrap(), Some("3".to_owned()));
    /// ```
    pub fn register_builtin_function(&self, name: &str, func: fn(&[Value]) -> Result<Value, Error>) {
        self.define_builtin(name, Rc::new(move |args: Vec<Value>| func(&args)));
    }

    /// Register a strongly-typed Rust function as a builtin, with argument
    /// extraction and result conversion handled by the adapter layer.
    ///
    /// Supported parameter types are `Value` (owned), `i64`, `&str`, and the
    /// sequence iterators `ValueIter<'_>` and `NumIter<'_>`, which accept a
    /// list, a vector or `nil`. Return types may be anything `Into<Value>` or a
    /// `Result` of one. Arity is enforced from the signature.
    ///
    /// ```rust,ignore
    /// fn add(a: i64, b: i64) -> i64 { a + b }
    /// env.register_builtin_operation::<_, (i64, i64)>("add", add);
    /// ```
    pub fn register_builtin_operation<F, Args>(&self, name: &str, func: F)
    where
        F: IntoOperation<Args> + 'static,
    {
        self.define_builtin(name, func.into_operation());
    }

    /// Register a builtin whose last parameter collects the remaining
    /// arguments (`fn(ValueIter<'_>)`, `fn(i64, NumIter<'_>)`, ...).
    ///
    /// The minimum and maximum counts of a variadic operation are not always
    /// derivable from its signature, so `arity` is validated on every call.
    pub fn register_variadic_builtin_operation<F, Args>(&self, name: &str, arity: Arity, func: F)
    where
        F: IntoVariadicOperation<Args> + 'static,
    {
        let inner = func.into_variadic_operation();
        self.define_builtin(
            name,
            Rc::new(move |args: Vec<Value>| {
                arity.validate(args.len())?;
                inner(args)
            }),
        );
    }

    /// Register a closure over the owned argument vector. Used for builtins
    /// that capture state, such as the REPL debug toggles.
    pub fn register_builtin_closure(
        &self,
        name: &str,
        arity: Arity,
        func: impl Fn(Vec<Value>) -> Result<Value, Error> + 'static,
    ) {
        self.define_builtin(
            name,
            Rc::new(move |args: Vec<Value>| {
                arity.validate(args.len())?;
                func(args)
            }),
        );
    }

    /// Get all bindings in this environment and its parents
    /// Returns a Vec of (name, value) pairs sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings = HashMap::new();

        // Start with outer bindings so local ones override them
        if let Some(outer) = &self.0.outer {
            bindings.extend(outer.get_all_bindings());
        }

        for (name, value) in self.0.bindings.borrow().iter() {
            bindings.insert(name.clone(), value.clone());
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// Bindings of this frame only, sorted by name
    pub fn local_bindings(&self) -> Vec<(String, Value)> {
        let mut result: Vec<_> = self
            .0
            .bindings
            .borrow()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

// Frames can be cyclic through captured closures, so only names are printed
impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.0.bindings.borrow().keys().cloned().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("bindings", &names)
            .field("outer", &self.0.outer)
            .finish()
    }
}

/// Environments are compared by identity
impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ast::{nil, val};

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_variadic_binding() {
        let env = Environment::with_bindings(
            None,
            &names(&["a", "&", "rest"]),
            vec![val(1), val(2), val(3), val(4)],
        )
        .unwrap();
        assert_eq!(env.get("a").unwrap(), val(1));
        assert_eq!(env.get("rest").unwrap(), val([2, 3, 4]));
    }

    #[test]
    fn test_binding_data_driven() {
        // (binds, exprs, expected bindings or None for BadEnvArity)
        let test_cases: Vec<(Vec<&str>, Vec<Value>, Option<Vec<(&str, Value)>>)> = vec![
            (vec![], vec![], Some(vec![])),
            (vec!["x", "y"], vec![val(1), val(2)], Some(vec![("x", val(1)), ("y", val(2))])),
            (vec!["x"], vec![], None),
            (vec!["x"], vec![val(1), val(2)], None),
            (vec!["&", "xs"], vec![], Some(vec![("xs", Value::list(vec![]))])),
            (
                vec!["a", "&", "xs"],
                vec![val(1)],
                Some(vec![("a", val(1)), ("xs", Value::list(vec![]))]),
            ),
            (vec!["a", "b", "&", "xs"], vec![val(1)], None),
            (vec!["a", "&"], vec![val(1)], None),
            (vec!["a", "&", "xs", "ys"], vec![val(1)], None),
        ];

        for (i, (binds, exprs, expected)) in test_cases.into_iter().enumerate() {
            let result = Environment::with_bindings(None, &names(&binds), exprs);
            match (result, expected) {
                (Ok(env), Some(expected)) => {
                    for (name, value) in expected {
                        assert_eq!(env.get(name).unwrap(), value, "Test case {}", i + 1);
                    }
                }
                (Err(Error::BadEnvArity { .. }), None) => {}
                (result, expected) => {
                    panic!("Test case {}: expected {expected:?}, got {result:?}", i + 1)
                }
            }
        }
    }

    #[test]
    fn test_lookup_through_chain() {
        let root = Environment::new();
        root.set("x", val(1)).set("y", val(2));
        let child = Environment::with_parent(&root);
        child.set("x", val(10));

        assert_eq!(child.get("x").unwrap(), val(10));
        assert_eq!(child.get("y").unwrap(), val(2));
        assert_eq!(root.get("x").unwrap(), val(1));
        assert_eq!(child.find("y"), Some(root.clone()));
        assert_eq!(child.find("x"), Some(child.clone()));
        assert_eq!(child.find("z"), None);
        assert!(matches!(child.get("z"), Err(Error::UnknownSymbol(name)) if name == "z"));
    }

    #[test]
    fn test_set_writes_local_frame_only() {
        let root = Environment::new();
        root.set("x", val(1));
        let child = Environment::with_parent(&root);
        child.set("x", nil());
        assert_eq!(root.get("x").unwrap(), val(1));
        assert_eq!(child.local_bindings(), vec![("x".to_owned(), nil())]);
        assert_eq!(child.get_all_bindings(), vec![("x".to_owned(), nil())]);
    }

    #[test]
    fn test_shared_frames() {
        let env = Environment::new();
        let alias = env.clone();
        alias.set("shared", val(true));
        assert_eq!(env.get("shared").unwrap(), val(true));

        let weak = env.downgrade();
        assert_eq!(weak.upgrade(), Some(env.clone()));
        drop(env);
        drop(alias);
        assert!(weak.upgrade().is_none());
    }
}
