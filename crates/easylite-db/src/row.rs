//! Mapping of result rows onto Rust values.

use rusqlite::types::FromSql;
use rusqlite::Row;

/// A value that can be built from one result row.
///
/// Implemented for single-column scalars, for `Option` of any column type,
/// and for tuples of up to eight columns. Structs implement it by reading
/// their columns by name or position:
///
/// ```rust
/// use easylite_db::FromRow;
///
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// impl FromRow for User {
///     fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
///         Ok(Self {
///             id: row.get("id")?,
///             name: row.get("name")?,
///         })
///     }
/// }
/// ```
pub trait FromRow: Sized {
    /// Builds the value from the current row.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

macro_rules! first_column {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl FromRow for $ty {
                fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
                    row.get(0)
                }
            }
        )+
    };
}

first_column!(bool, i8, i16, i32, i64, u8, u16, u32, f64, String, Vec<u8>);

impl<T: FromSql> FromRow for Option<T> {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        row.get(0)
    }
}

macro_rules! tuple_columns {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: FromSql),+> FromRow for ($($name,)+) {
            fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
                Ok(($(row.get::<usize, $name>($idx)?,)+))
            }
        }
    };
}

tuple_columns!(A: 0);
tuple_columns!(A: 0, B: 1);
tuple_columns!(A: 0, B: 1, C: 2);
tuple_columns!(A: 0, B: 1, C: 2, D: 3);
tuple_columns!(A: 0, B: 1, C: 2, D: 3, E: 4);
tuple_columns!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
tuple_columns!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
tuple_columns!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
