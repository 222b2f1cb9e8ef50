//! # Positional Arguments
//!
//! Marshalling between Rust tuples and the opaque argument list of a request.
//!
//! - [`IntoArgs`]: the client side, turning `(a, b, c)` into `Vec<Value>`.
//! - [`FromArgs`]: the server side, converting each element to its declared
//!   parameter type by position.
//! - [`MethodFn`]: lets a plain closure `Fn(A, B) -> R` be registered as a
//!   handler method taking `(A, B)`.
//!
//! All three are implemented for arities 0 through 8.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Values that can be sent as a request's argument list.
pub trait IntoArgs {
    fn into_args(self) -> Result<Vec<Value>, serde_json::Error>;
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> Result<Vec<Value>, serde_json::Error> {
        Ok(self)
    }
}

/// Parameter lists that can be rebuilt from a request's argument list.
///
/// Errors are plain messages, since they are reported back to the caller as
/// the response's `E` field.
pub trait FromArgs: Sized {
    const ARITY: usize;

    fn from_args(args: Vec<Value>) -> Result<Self, String>;
}

/// A callable taking the parameter tuple `Args` and returning `R`.
pub trait MethodFn<Args, R>: Send + Sync + 'static {
    fn call(&self, args: Args) -> R;
}

fn next_arg<T, I>(args: &mut I, index: usize) -> Result<T, String>
where
    T: DeserializeOwned,
    I: Iterator<Item = Value>,
{
    let value = args
        .next()
        .ok_or_else(|| format!("Missing argument {}", index))?;
    serde_json::from_value(value)
        .map_err(|e| format!("Argument {} could not be converted: {}", index, e))
}

macro_rules! impl_args {
    ($arity:expr; $($ty:ident $var:ident $idx:tt),*) => {
        impl<$($ty: Serialize),*> IntoArgs for ($($ty,)*) {
            #[allow(unused_variables)]
            fn into_args(self) -> Result<Vec<Value>, serde_json::Error> {
                Ok(vec![$(serde_json::to_value(self.$idx)?),*])
            }
        }

        impl<$($ty: DeserializeOwned),*> FromArgs for ($($ty,)*) {
            const ARITY: usize = $arity;

            #[allow(unused_mut, unused_variables)]
            fn from_args(args: Vec<Value>) -> Result<Self, String> {
                if args.len() != Self::ARITY {
                    return Err(format!(
                        "Expected {} argument(s), got {}",
                        Self::ARITY,
                        args.len()
                    ));
                }
                let mut iter = args.into_iter();
                Ok(($(next_arg::<$ty, _>(&mut iter, $idx)?,)*))
            }
        }

        impl<Func, Ret, $($ty),*> MethodFn<($($ty,)*), Ret> for Func
        where
            Func: Fn($($ty),*) -> Ret + Send + Sync + 'static,
        {
            #[allow(unused_variables)]
            fn call(&self, args: ($($ty,)*)) -> Ret {
                let ($($var,)*) = args;
                self($($var),*)
            }
        }
    };
}

impl_args!(0;);
impl_args!(1; A a 0);
impl_args!(2; A a 0, B b 1);
impl_args!(3; A a 0, B b 1, C c 2);
impl_args!(4; A a 0, B b 1, C c 2, D d 3);
impl_args!(5; A a 0, B b 1, C c 2, D d 3, E e 4);
impl_args!(6; A a 0, B b 1, C c 2, D d 3, E e 4, F f 5);
impl_args!(7; A a 0, B b 1, C c 2, D d 3, E e 4, F f 5, G g 6);
impl_args!(8; A a 0, B b 1, C c 2, D d 3, E e 4, F f 5, G g 6, H h 7);
