#![forbid(unsafe_code)]

/// Declares a closed string enum with its canonical lowercase spelling.
///
/// The first listed variant is the `Default`, which is also what a NULL
/// storage column maps to.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident as $kind:literal {
            $first:ident => $first_str:literal,
            $($variant:ident => $text:literal),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            #[default]
            #[serde(rename = $first_str)]
            $first,
            $(
                #[serde(rename = $text)]
                $variant,
            )*
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$name::$first, $($name::$variant),*];

            pub fn as_str(self) -> &'static str {
                match self {
                    Self::$first => $first_str,
                    $(Self::$variant => $text,)*
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::model::ParseEnumError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                match raw.trim() {
                    $first_str => Ok(Self::$first),
                    $($text => Ok(Self::$variant),)*
                    other => Err($crate::model::ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use string_enum;
