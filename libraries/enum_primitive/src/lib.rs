// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! A macro for generating `From<primitive>` conversions for C-like enums,
//! so wire-format discriminants (baud codes, request types, service
//! classes) can be parsed back into enums without a hand-written `match`
//! per field.
#![no_std]

/// Implements `TryFrom<$ty>` for an enum whose variants carry explicit
/// discriminants, returning `Err(())` for any value with no matching
/// variant.
///
/// ```ignore
/// enum_from_primitive! {
///     #[derive(Copy, Clone, Debug, PartialEq, Eq)]
///     pub enum RequestType {
///         Req = 1,
///         Resp = 2,
///     }
/// }
/// assert_eq!(RequestType::try_from(1u8), Ok(RequestType::Req));
/// assert_eq!(RequestType::try_from(9u8), Err(()));
/// ```
#[macro_export]
macro_rules! enum_from_primitive {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident {
            $( $variant:ident = $discriminant:expr ),* $(,)?
        }
    ) => {
        $( #[$enum_attr] )*
        pub enum $name {
            $( $variant = $discriminant ),*
        }

        $crate::enum_from_primitive_impl! { $name, $( $variant = $discriminant ),* }
    };
}

#[macro_export]
macro_rules! enum_from_primitive_impl {
    ($name:ident, $( $variant:ident = $discriminant:expr ),*) => {
        impl core::convert::TryFrom<usize> for $name {
            type Error = ();

            fn try_from(value: usize) -> Result<Self, Self::Error> {
                match value {
                    $( x if x == $discriminant as usize => Ok($name::$variant), )*
                    _ => Err(()),
                }
            }
        }

        impl core::convert::TryFrom<u32> for $name {
            type Error = ();

            fn try_from(value: u32) -> Result<Self, Self::Error> {
                match value {
                    $( x if x == $discriminant as u32 => Ok($name::$variant), )*
                    _ => Err(()),
                }
            }
        }

        impl core::convert::TryFrom<u8> for $name {
            type Error = ();

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( x if x == $discriminant as u8 => Ok($name::$variant), )*
                    _ => Err(()),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    enum_from_primitive! {
        #[derive(Copy, Clone, Debug, PartialEq, Eq)]
        pub enum RequestType {
            Req = 1,
            Resp = 2,
        }
    }

    #[test]
    fn round_trips_known_discriminants() {
        assert_eq!(RequestType::try_from(1u8), Ok(RequestType::Req));
        assert_eq!(RequestType::try_from(2u8), Ok(RequestType::Resp));
    }

    #[test]
    fn rejects_unknown_discriminant() {
        assert_eq!(RequestType::try_from(9u8), Err(()));
    }
}
