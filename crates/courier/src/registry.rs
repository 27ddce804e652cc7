//! The procedure registry: a name-keyed map of clonable procedures.
//!
//! Registered procedures are prototypes. Every call clones its prototype, so
//! concurrent invocations of the same method never share argument storage;
//! the clone is dropped when the call completes.

use crate::RemoteError;
use sinfo::{Compose, Decompose, SerializationError, SerializationInfo};
use std::collections::HashMap;
use std::sync::Mutex;

/// A clonable callable representing one RPC method.
///
/// The call protocol is: `begin_call`, then one `fixup_arg` per parsed
/// argument subtree in position order, then `end_call` which invokes the
/// implementation and decomposes its result.
pub trait Procedure: Send {
    /// Number of arguments the method expects.
    fn arity(&self) -> usize;
    /// Resets per-call argument storage.
    fn begin_call(&mut self);
    /// Absorbs the argument at `index` from a parsed subtree.
    fn fixup_arg(
        &mut self,
        index: usize,
        arg: &SerializationInfo,
    ) -> Result<(), SerializationError>;
    /// Invokes the method and returns its decomposed result.
    fn end_call(&mut self) -> anyhow::Result<SerializationInfo>;
    /// Duplicates the prototype for one concurrent invocation.
    fn clone_boxed(&self) -> Box<dyn Procedure>;
}

/// ServiceRegistry maps method names to procedure prototypes. It is shared
/// between the binary server and the HTTP adapters, which dispatch through
/// the identical clone-per-call path.
#[derive(Default)]
pub struct ServiceRegistry {
    procedures: Mutex<HashMap<String, Box<dyn Procedure>>>,
}

/// Builds the lookup key of a possibly domain-scoped method. A NUL joins the
/// two parts, which cannot appear in either.
fn registry_key(domain: &str, method: &str) -> String {
    if domain.is_empty() {
        method.to_owned()
    } else {
        format!("{domain}\0{method}")
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a procedure, replacing any previous registration of `name`.
    pub fn register_procedure(&self, name: impl Into<String>, procedure: Box<dyn Procedure>) {
        self.procedures
            .lock()
            .expect("registry lock poisoned")
            .insert(name.into(), procedure);
    }

    /// Installs a procedure under a domain scope.
    pub fn register_domain_procedure(
        &self,
        domain: &str,
        name: &str,
        procedure: Box<dyn Procedure>,
    ) {
        self.register_procedure(registry_key(domain, name), procedure);
    }

    /// Removes a registration; true when something was removed.
    pub fn unregister_procedure(&self, name: &str) -> bool {
        self.procedures
            .lock()
            .expect("registry lock poisoned")
            .remove(name)
            .is_some()
    }

    /// Clones the prototype registered for a method. Lookup is exact.
    pub fn get_procedure(&self, domain: &str, method: &str) -> Option<Box<dyn Procedure>> {
        self.procedures
            .lock()
            .expect("registry lock poisoned")
            .get(&registry_key(domain, method))
            .map(|p| p.clone_boxed())
    }

    pub fn method_names(&self) -> Vec<String> {
        self.procedures
            .lock()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// One-shot dispatch for adapters that hold all arguments up front.
    pub fn dispatch(
        &self,
        domain: &str,
        method: &str,
        args: &[SerializationInfo],
    ) -> Result<SerializationInfo, DispatchError> {
        let Some(mut procedure) = self.get_procedure(domain, method) else {
            return Err(DispatchError::UnknownMethod(method.to_owned()));
        };
        if args.len() != procedure.arity() {
            return Err(DispatchError::ArgumentMismatch {
                expected: procedure.arity(),
                got: args.len(),
            });
        }
        procedure.begin_call();
        for (index, arg) in args.iter().enumerate() {
            procedure
                .fixup_arg(index, arg)
                .map_err(DispatchError::BadArgument)?;
        }
        procedure.end_call().map_err(DispatchError::Failed)
    }
}

/// How a one-shot dispatch can fail; adapters map these onto their own
/// error surfaces (fault structs, error objects, error frames).
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown method \"{0}\"")]
    UnknownMethod(String),
    #[error("expected {expected} arguments, got {got}")]
    ArgumentMismatch { expected: usize, got: usize },
    #[error(transparent)]
    BadArgument(SerializationError),
    #[error(transparent)]
    Failed(anyhow::Error),
}

impl DispatchError {
    /// The (rc, message) pair carried by an error reply.
    pub fn rc_and_message(&self) -> (i32, String) {
        match self {
            DispatchError::Failed(err) => match err.downcast_ref::<RemoteError>() {
                Some(remote) => (remote.rc, remote.message.clone()),
                None => (0, err.to_string()),
            },
            other => (0, other.to_string()),
        }
    }
}

/// Turns the result of a procedure body into a decomposed tree.
fn decompose_result<R: Decompose>(value: R) -> SerializationInfo {
    let mut si = SerializationInfo::new();
    value.decompose(&mut si);
    si
}

macro_rules! fn_procedure {
    ($fn_name:ident, $struct_name:ident, $count:literal $(, $arg:ident : $ty:ident : $idx:tt)*) => {
        struct $struct_name<F, $($ty,)* R> {
            f: F,
            $($arg: Option<$ty>,)*
            _result: std::marker::PhantomData<fn() -> R>,
        }

        impl<F, $($ty,)* R> Procedure for $struct_name<F, $($ty,)* R>
        where
            F: Fn($($ty),*) -> anyhow::Result<R> + Clone + Send + 'static,
            $($ty: Compose + Send + 'static,)*
            R: Decompose + Send + 'static,
        {
            fn arity(&self) -> usize {
                $count
            }

            fn begin_call(&mut self) {
                $(self.$arg = None;)*
            }

            #[allow(unused_variables)]
            fn fixup_arg(
                &mut self,
                index: usize,
                arg: &SerializationInfo,
            ) -> Result<(), SerializationError> {
                match index {
                    $($idx => {
                        self.$arg = Some(<$ty>::compose(arg)?);
                        Ok(())
                    })*
                    _ => Err(SerializationError::MemberIndexOutOfRange {
                        index,
                        len: $count,
                    }),
                }
            }

            fn end_call(&mut self) -> anyhow::Result<SerializationInfo> {
                $(
                    let $arg = self
                        .$arg
                        .take()
                        .ok_or_else(|| anyhow::anyhow!("argument expected"))?;
                )*
                let result = (self.f)($($arg),*)?;
                Ok(decompose_result(result))
            }

            fn clone_boxed(&self) -> Box<dyn Procedure> {
                Box::new($struct_name {
                    f: self.f.clone(),
                    $($arg: None,)*
                    _result: std::marker::PhantomData,
                })
            }
        }

        /// Wraps a function of matching arity as a registrable procedure.
        pub fn $fn_name<F, $($ty,)* R>(f: F) -> Box<dyn Procedure>
        where
            F: Fn($($ty),*) -> anyhow::Result<R> + Clone + Send + 'static,
            $($ty: Compose + Send + 'static,)*
            R: Decompose + Send + 'static,
        {
            Box::new($struct_name {
                f,
                $($arg: None,)*
                _result: std::marker::PhantomData,
            })
        }
    };
}

fn_procedure!(procedure0, FnProcedure0, 0);
fn_procedure!(procedure1, FnProcedure1, 1, a0: A0: 0);
fn_procedure!(procedure2, FnProcedure2, 2, a0: A0: 0, a1: A1: 1);
fn_procedure!(procedure3, FnProcedure3, 3, a0: A0: 0, a1: A1: 1, a2: A2: 2);
fn_procedure!(procedure4, FnProcedure4, 4, a0: A0: 0, a1: A1: 1, a2: A2: 2, a3: A3: 3);

#[cfg(test)]
mod test {
    use super::*;

    fn multiply_registry() -> ServiceRegistry {
        let registry = ServiceRegistry::new();
        registry.register_procedure(
            "multiply",
            procedure2(|a: i32, b: i32| Ok(a * b)),
        );
        registry
    }

    #[test]
    fn dispatch_runs_a_clone() {
        let registry = multiply_registry();
        let mut args = [SerializationInfo::new(), SerializationInfo::new()];
        args[0].set_value(2i32);
        args[1].set_value(3i32);

        let result = registry.dispatch("", "multiply", &args).unwrap();
        assert_eq!(result.get_value::<i32>().unwrap(), 6);

        // The prototype is untouched; a second dispatch works identically.
        let result = registry.dispatch("", "multiply", &args).unwrap();
        assert_eq!(result.get_value::<i32>().unwrap(), 6);
    }

    #[test]
    fn unknown_method_is_reported() {
        let registry = multiply_registry();
        assert!(matches!(
            registry.dispatch("", "divide", &[]),
            Err(DispatchError::UnknownMethod(_))
        ));
    }

    #[test]
    fn replacing_a_registration_wins() {
        let registry = multiply_registry();
        registry.register_procedure("multiply", procedure2(|a: i32, b: i32| Ok(a + b)));
        let mut args = [SerializationInfo::new(), SerializationInfo::new()];
        args[0].set_value(2i32);
        args[1].set_value(3i32);
        let result = registry.dispatch("", "multiply", &args).unwrap();
        assert_eq!(result.get_value::<i32>().unwrap(), 5);
    }

    #[test]
    fn domain_scoped_lookup_is_exact() {
        let registry = ServiceRegistry::new();
        registry.register_domain_procedure("math", "neg", procedure1(|a: i32| Ok(-a)));

        assert!(registry.get_procedure("math", "neg").is_some());
        assert!(registry.get_procedure("", "neg").is_none());
        assert!(registry.get_procedure("other", "neg").is_none());
    }

    #[test]
    fn remote_errors_carry_their_rc() {
        let registry = ServiceRegistry::new();
        registry.register_procedure(
            "fail",
            procedure0(|| -> anyhow::Result<i32> {
                Err(RemoteError::new(7, "Fault").into())
            }),
        );
        let err = registry.dispatch("", "fail", &[]).unwrap_err();
        assert_eq!(err.rc_and_message(), (7, "Fault".to_owned()));
    }
}
