/// Enum whose variants cover the full range of the integer type `$uxx`
macro_rules! full_range {
    ($uxx:ty,
        $(#[$enum_attr:meta])*
        pub enum $Enum:ident {
            $(
                #[$variant_attr:meta]
                $Variant:ident = $value:expr,
            )+
        }
    ) => {
        $(#[$enum_attr])*
        pub enum $Enum {
            $(
                #[$variant_attr]
                $Variant,
            )+
            /// Unknown
            Unknown($uxx),
        }

        impl From<$uxx> for $Enum {
            fn from(n: $uxx) -> $Enum {
                match n {
                    $(
                        $value => $Enum::$Variant,
                    )+
                    _ => $Enum::Unknown(n),
                }
            }
        }

        impl From<$Enum> for $uxx {
            fn from(e: $Enum) -> $uxx {
                match e {
                    $(
                        $Enum::$Variant => $value,
                    )+
                    $Enum::Unknown(n) => n,
                }
            }
        }
    };
}

/// Reads the bitfield of a byte / word
macro_rules! get {
    ($byte:expr, $field:ident) => {
        ($byte >> self::$field::OFFSET) & self::$field::MASK
    };
}

/// Writes to the bitfield of a byte / word
macro_rules! set {
    ($byte:expr, $field:ident, $value:expr) => {{
        let byte = &mut $byte;

        *byte &= !(self::$field::MASK << self::$field::OFFSET);
        *byte |= ($value & self::$field::MASK) << self::$field::OFFSET;
    }};
}

/// `Clone` and `PartialEq` for a layer that keeps its encapsulated PDU in an `inner` field
///
/// Fields listed under `derived` are cloned but ignored by comparisons; serialization recomputes
/// them (checksums, next protocol tags, ...)
macro_rules! layer {
    ($Layer:ident { $($field:ident),* $(,)? } derived { $($derived:ident),* $(,)? }) => {
        impl Clone for $Layer {
            fn clone(&self) -> Self {
                $Layer {
                    $($field: self.$field.clone(),)*
                    $($derived: self.$derived.clone(),)*
                    inner: self
                        .inner
                        .as_ref()
                        .map(|inner| $crate::pdu::Pdu::clone_pdu(&**inner)),
                }
            }
        }

        impl PartialEq for $Layer {
            fn eq(&self, other: &Self) -> bool {
                true $(&& self.$field == other.$field)*
                    && match (&self.inner, &other.inner) {
                        (Some(a), Some(b)) => **a == **b,
                        (None, None) => true,
                        _ => false,
                    }
            }
        }
    };
}

/// Chain plumbing of the `Pdu` trait; expands inside an `impl Pdu for $Layer` block
macro_rules! chain {
    () => {
        fn inner(&self) -> Option<&(dyn $crate::pdu::Pdu + 'static)> {
            self.inner.as_deref()
        }

        fn inner_mut(&mut self) -> Option<&mut (dyn $crate::pdu::Pdu + 'static)> {
            self.inner.as_deref_mut()
        }

        fn replace_inner(
            &mut self,
            inner: Option<Box<dyn $crate::pdu::Pdu>>,
        ) -> Option<Box<dyn $crate::pdu::Pdu>> {
            core::mem::replace(&mut self.inner, inner)
        }

        fn clone_pdu(&self) -> Box<dyn $crate::pdu::Pdu> {
            Box::new(self.clone())
        }

        fn dyn_eq(&self, other: &dyn $crate::pdu::Pdu) -> bool {
            $crate::pdu::Pdu::as_any(other)
                .downcast_ref::<Self>()
                .map_or(false, |other| self == other)
        }

        fn as_any(&self) -> &dyn core::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn core::any::Any {
            self
        }
    };
}
