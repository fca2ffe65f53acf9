// Macro to create a strongly typed wrapper around a catalog row id.
//
// # Example
//
//     define_row_id! {
//         /// Identifies a product
//         pub struct ProductId;
//     }
//
macro_rules! define_row_id {
    (
        $(#[$attrs:meta])*
        $vis:vis struct $name:ident;
    ) => {
        $(#[$attrs])*
        #[derive(
            Copy,
            Clone,
            Eq,
            PartialEq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
            sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        $vis struct $name(i64);

        impl $name {
            #[allow(dead_code)]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            #[allow(dead_code)]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}
