//! Data that is used for generating schedules.

use serde::{Deserialize, Serialize};

pub mod bundle;
pub mod config;
pub mod interval;
pub mod resource;
pub mod rule;
pub mod spec;
pub mod task;

pub use bundle::*;
pub use config::*;
pub use interval::*;
pub use resource::*;
pub use rule::*;
pub use spec::*;
pub use task::*;

/// Create a [`DateTime`](chrono::prelude::DateTime) literal.
#[macro_export]
macro_rules! datetime {
    ($mo:literal/$d:literal/$yr:literal @ $hr:literal:$m:literal) => {
        <chrono::prelude::Utc as chrono::TimeZone>::from_utc_datetime(
            &chrono::prelude::Utc,
            &chrono::prelude::NaiveDateTime::new(
                chrono::prelude::NaiveDate::from_ymd_opt($yr, $mo, $d)
                    .unwrap_or_else(|| panic!("`{}/{}/{}` is not a valid date", $mo, $d, $yr)),
                chrono::prelude::NaiveTime::from_hms_opt($hr, $m, 0)
                    .unwrap_or_else(|| panic!("`{}:{}` is not a valid time", $hr, $m)),
            ),
        )
    };

    ($mo:literal/$d:literal/$yr:literal) => {
        <chrono::prelude::Utc as chrono::TimeZone>::from_utc_datetime(
            &chrono::prelude::Utc,
            &chrono::prelude::NaiveDateTime::new(
                chrono::prelude::NaiveDate::from_ymd_opt($yr, $mo, $d)
                    .unwrap_or_else(|| panic!("`{}/{}/{}` is not a valid date", $mo, $d, $yr)),
                Default::default(),
            ),
        )
    };
}

/// Create a [`TimeInterval`](crate::data::interval::TimeInterval) literal.
///
/// Internally half-open: `end` is exclusive (see [`TimeInterval`](crate::data::interval::TimeInterval)).
#[macro_export]
macro_rules! time_interval {
    (
        $mo0:literal/$d0:literal/$yr0:literal @ $hr0:literal:$m0:literal -
        $mo1:literal/$d1:literal/$yr1:literal @ $hr1:literal:$m1:literal
    ) => {
        $crate::data::interval::TimeInterval::new(
            $crate::datetime!($mo0/$d0/$yr0 @ $hr0:$m0),
            $crate::datetime!($mo1/$d1/$yr1 @ $hr1:$m1),
        )
    };

    (
        $mo0:literal/$d0:literal/$yr0:literal -
        $mo1:literal/$d1:literal/$yr1:literal
    ) => {
        $crate::data::interval::TimeInterval::new(
            $crate::datetime!($mo0/$d0/$yr0),
            $crate::datetime!($mo1/$d1/$yr1),
        )
    };
}

macro_rules! id_type {
    ($(#[$m:meta])* impl Id for $Type:ident as $prefix:literal) => {
        ::paste::paste! {
            #[doc = " Code uniquely identifying a [`" $Type "`]."]
            ///
            /// Ids are caller-supplied (this engine never mints one): they come
            /// verbatim out of the input bundle and are only ever echoed back.
            $(#[$m])*
            #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            pub struct $Type(pub ::std::sync::Arc<str>);

            #[allow(dead_code)]
            impl $Type {
                /// Construct an id from any string-like value.
                pub fn new(id: impl Into<::std::sync::Arc<str>>) -> Self {
                    Self(id.into())
                }

                /// Borrow the underlying string.
                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            impl From<&str> for $Type {
                fn from(s: &str) -> Self {
                    Self(::std::sync::Arc::from(s))
                }
            }

            impl From<String> for $Type {
                fn from(s: String) -> Self {
                    Self(::std::sync::Arc::from(s.as_str()))
                }
            }

            impl std::fmt::Display for $Type {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, concat!($prefix, ":{}"), self.0)
                }
            }

            #[doc = " A dictionary associating [`" $Type "`]s with `T`."]
            pub type [<$Type Map>]<T = $Type> = ::rustc_hash::FxHashMap<$Type, T>;

            #[doc = " A set of [`" $Type "`]s."]
            pub type [<$Type Set>] = ::rustc_hash::FxHashSet<$Type>;
        }
    };
}

pub(crate) use id_type;
