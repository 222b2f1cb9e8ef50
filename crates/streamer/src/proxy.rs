//! # Typed Proxies
//!
//! Turns a declared contract into an object whose async methods are remote
//! calls over a [`ClientChannel`].
//!
//! A proxy type implements [`Contract`], normally through the [`contract!`]
//! macro. The first time a contract is used its spec is validated, and the
//! outcome (descriptor or error) is cached for the life of the process.
//!
//! ```ignore
//! streamer::contract! {
//!     pub interface IAdder in "Client" {
//!         async fn increment(value: i32) -> i32;
//!     }
//! }
//!
//! let adder = channel.typed::<IAdder>()?;
//! assert_eq!(adder.increment(5).await?, 6);
//! ```
//!
//! ## Invariants
//!
//! - A contract is validated at most once per process.
//! - A contract that fails validation never produces a proxy, and so never
//!   touches the network.
//! - A proxy only forwards. It holds no state besides its channel and
//!   descriptor.

use std::any::TypeId;
use std::sync::Arc;
use std::sync::LazyLock;

use dashmap::DashMap;
use serde::de::DeserializeOwned;

use crate::args::IntoArgs;
use crate::client;
use crate::client::ClientChannel;
use crate::contract;
use crate::contract::ContractDescriptor;
use crate::contract::ContractSpec;

/// A type that can stand in for a remote handler.
pub trait Contract: Sized + Send + Sync + 'static {
    /// The declared members of this contract.
    fn spec() -> ContractSpec;

    /// Wraps an untyped forwarder already validated for this contract.
    fn from_proxy(proxy: Proxy) -> Self;
}

type CachedDescriptor = contract::Result<Arc<ContractDescriptor>>;

static DESCRIPTORS: LazyLock<DashMap<TypeId, CachedDescriptor>> = LazyLock::new(DashMap::new);

/// The validated descriptor of `T`, computed on first use.
pub fn descriptor<T: Contract>() -> contract::Result<Arc<ContractDescriptor>> {
    let id = TypeId::of::<T>();
    if let Some(cached) = DESCRIPTORS.get(&id) {
        return cached.value().clone();
    }

    let entry = DESCRIPTORS.entry(id).or_insert_with(|| {
        let outcome = ContractDescriptor::validate(T::spec()).map(Arc::new);
        match &outcome {
            Ok(descriptor) => tracing::debug!(
                contract = %descriptor.full_name(),
                methods = descriptor.methods().len(),
                "contract validated"
            ),
            Err(e) => tracing::warn!(
                contract = std::any::type_name::<T>(),
                error = %e,
                "contract rejected"
            ),
        }
        outcome
    });
    entry.value().clone()
}

/// Validates `T` without building a proxy.
pub fn validate<T: Contract>() -> contract::Result<()> {
    descriptor::<T>().map(|_| ())
}

/// Builds a `T` whose calls go over `channel`.
pub fn build<T: Contract>(channel: Arc<ClientChannel>) -> contract::Result<T> {
    let descriptor = descriptor::<T>()?;
    Ok(T::from_proxy(Proxy {
        channel,
        descriptor,
    }))
}

/// Untyped forwarder behind every generated proxy.
#[derive(Clone)]
pub struct Proxy {
    channel: Arc<ClientChannel>,
    descriptor: Arc<ContractDescriptor>,
}

impl Proxy {
    /// Calls the contract member `member` with positional `args`.
    pub async fn call<R, A>(&self, member: &str, args: A) -> client::Result<R>
    where
        R: DeserializeOwned,
        A: IntoArgs,
    {
        let method = self
            .descriptor
            .method(member)
            .ok_or_else(|| client::Error::UnknownMember(member.to_string()))?;
        self.channel.invoke_as::<R, A>(&method.wire_name, args).await
    }
}

/// Declares a contract and generates its proxy type.
///
/// ```ignore
/// streamer::contract! {
///     /// Echoes strings back.
///     pub interface IEchoHandler in "Sample" {
///         async fn echo_async(value: String) -> String;
///         async fn reset();
///     }
/// }
/// ```
///
/// Members may be `async fn`, plain `fn`, `property name: T;` or
/// `event name;`. Only contracts made entirely of `async fn` pass
/// validation. The other forms exist so such contracts can be declared and
/// rejected. `class` may be written in place of `interface`, and is rejected
/// the same way.
#[macro_export]
macro_rules! contract {
    (@munch $meta:tt $vis:tt $name:tt $ns:tt $kind:tt $calls:tt [$($members:tt)*]) => {
        $crate::contract!(@emit $meta $vis $name $ns $kind $calls [$($members)*]);
    };

    (@munch $meta:tt $vis:tt $name:tt $ns:tt $kind:tt [$($calls:tt)*] [$($members:tt)*]
        $(#[$mm:meta])* async fn $m:ident($($p:ident : $t:ty),* $(,)?) -> $r:ty; $($rest:tt)*
    ) => {
        $crate::contract!(@munch $meta $vis $name $ns $kind
            [$($calls)* { $(#[$mm])* $m ($($p : $t),*) -> $r }]
            [$($members)* $crate::contract::MemberSpec::Method($crate::contract::MethodSpec::new(
                stringify!($m),
                vec![$($crate::contract::ParamSpec::of::<$t>(stringify!($p))),*],
                $crate::contract::ResultShape::of_async::<$r>(),
            )),]
            $($rest)*
        );
    };

    (@munch $meta:tt $vis:tt $name:tt $ns:tt $kind:tt [$($calls:tt)*] [$($members:tt)*]
        $(#[$mm:meta])* async fn $m:ident($($p:ident : $t:ty),* $(,)?); $($rest:tt)*
    ) => {
        $crate::contract!(@munch $meta $vis $name $ns $kind
            [$($calls)* { $(#[$mm])* $m ($($p : $t),*) -> () }]
            [$($members)* $crate::contract::MemberSpec::Method($crate::contract::MethodSpec::new(
                stringify!($m),
                vec![$($crate::contract::ParamSpec::of::<$t>(stringify!($p))),*],
                $crate::contract::ResultShape::AsyncUnit,
            )),]
            $($rest)*
        );
    };

    (@munch $meta:tt $vis:tt $name:tt $ns:tt $kind:tt [$($calls:tt)*] [$($members:tt)*]
        $(#[$mm:meta])* fn $m:ident($($p:ident : $t:ty),* $(,)?) -> $r:ty; $($rest:tt)*
    ) => {
        $crate::contract!(@munch $meta $vis $name $ns $kind
            [$($calls)* { $(#[$mm])* $m ($($p : $t),*) -> $r }]
            [$($members)* $crate::contract::MemberSpec::Method($crate::contract::MethodSpec::new(
                stringify!($m),
                vec![$($crate::contract::ParamSpec::of::<$t>(stringify!($p))),*],
                $crate::contract::ResultShape::blocking::<$r>(),
            )),]
            $($rest)*
        );
    };

    (@munch $meta:tt $vis:tt $name:tt $ns:tt $kind:tt [$($calls:tt)*] [$($members:tt)*]
        $(#[$mm:meta])* fn $m:ident($($p:ident : $t:ty),* $(,)?); $($rest:tt)*
    ) => {
        $crate::contract!(@munch $meta $vis $name $ns $kind
            [$($calls)* { $(#[$mm])* $m ($($p : $t),*) -> () }]
            [$($members)* $crate::contract::MemberSpec::Method($crate::contract::MethodSpec::new(
                stringify!($m),
                vec![$($crate::contract::ParamSpec::of::<$t>(stringify!($p))),*],
                $crate::contract::ResultShape::blocking::<()>(),
            )),]
            $($rest)*
        );
    };

    (@munch $meta:tt $vis:tt $name:tt $ns:tt $kind:tt $calls:tt [$($members:tt)*]
        $(#[$mm:meta])* property $p:ident : $t:ty; $($rest:tt)*
    ) => {
        $crate::contract!(@munch $meta $vis $name $ns $kind $calls
            [$($members)* $crate::contract::MemberSpec::Property {
                name: stringify!($p),
                type_name: ::std::any::type_name::<$t>(),
            },]
            $($rest)*
        );
    };

    (@munch $meta:tt $vis:tt $name:tt $ns:tt $kind:tt $calls:tt [$($members:tt)*]
        $(#[$mm:meta])* event $e:ident; $($rest:tt)*
    ) => {
        $crate::contract!(@munch $meta $vis $name $ns $kind $calls
            [$($members)* $crate::contract::MemberSpec::Event { name: stringify!($e) },]
            $($rest)*
        );
    };

    (@emit [$($meta:tt)*] [$vis:vis] [$name:ident] [$ns:literal] [$kind:ident]
        [$({ $(#[$mm:meta])* $m:ident ($($p:ident : $t:ty),*) -> $r:ty })*]
        [$($members:tt)*]
    ) => {
        $($meta)*
        #[derive(Clone)]
        $vis struct $name {
            proxy: $crate::proxy::Proxy,
        }

        impl $name {
            $(
                $(#[$mm])*
                #[allow(non_snake_case)]
                pub async fn $m(&self, $($p: $t),*) -> $crate::client::Result<$r> {
                    self.proxy.call::<$r, _>(stringify!($m), ($($p,)*)).await
                }
            )*
        }

        impl $crate::proxy::Contract for $name {
            fn spec() -> $crate::contract::ContractSpec {
                $crate::contract::ContractSpec::new(
                    $ns,
                    stringify!($name),
                    $crate::contract::ContractKind::$kind,
                    vec![$($members)*],
                )
            }

            fn from_proxy(proxy: $crate::proxy::Proxy) -> Self {
                Self { proxy }
            }
        }
    };

    ($(#[$meta:meta])* $vis:vis interface $name:ident in $ns:literal { $($body:tt)* }) => {
        $crate::contract!(@munch [$(#[$meta])*] [$vis] [$name] [$ns] [Interface] [] [] $($body)*);
    };

    ($(#[$meta:meta])* $vis:vis class $name:ident in $ns:literal { $($body:tt)* }) => {
        $crate::contract!(@munch [$(#[$meta])*] [$vis] [$name] [$ns] [Class] [] [] $($body)*);
    };
}
