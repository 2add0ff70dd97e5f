//! Macro for the string forms of status-like enums
//!
//! Ledger statuses, operation kinds and error codes are stored as text in
//! SQLite and appear in logs, so each needs one canonical lowercase form.
//!
//! # Example
//!
//! ```rust
//! use tether_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Phase {
//!     Queued,
//!     Running,
//! }
//!
//! impl_domain_status_conversions!(Phase {
//!     Queued => "queued",
//!     Running => "running",
//! });
//!
//! assert_eq!(Phase::Running.as_str(), "running");
//! assert_eq!("QUEUED".parse::<Phase>(), Ok(Phase::Queued));
//! ```

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum
///
/// Parsing is case-insensitive; output is always the mapped string.
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Canonical string form
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}
