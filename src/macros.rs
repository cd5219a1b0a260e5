//! Declarative helpers for wire enums and error code tables.

/// Declares a `u8`-backed wire enum with a fallible `from_u8` lookup.
macro_rules! define_wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant = $value ),+
        }

        impl $name {
            pub fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $( v if v == $value => Some($name::$variant), )+
                    _ => None,
                }
            }

            pub fn as_u8(self) -> u8 {
                self as u8
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                value as u8
            }
        }
    };
}

/// Declares numeric error code constants together with `get_error_message`.
macro_rules! define_error_codes {
    ( $( $name:ident = $code:literal => $msg:expr ),+ $(,)? ) => {
        $( pub const $name: u32 = $code; )+

        /// Human-readable description of an error code.
        pub fn get_error_message(code: u32) -> &'static str {
            match code {
                $( $code => $msg, )+
                _ => "Unknown Error",
            }
        }
    };
}
