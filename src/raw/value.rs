// The word encoding of a value slot.
//
// Value slots are plain atomic words with reserved bit patterns layered over them.
// The rest of the table only sees the decoded `Value`, so tag bits are never
// confused with user data.

// The state of a value slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Value {
    // The slot was never written.
    Empty,

    // The slot holds user data.
    Real(usize),

    // The slot was retired by a resize. Its data, if any, lives in the next generation.
    Copied,
}

impl Value {
    // The tag bit reserved for slot states.
    pub const TAG: usize = 1 << (usize::BITS - 1);

    // The word for `Value::Empty`.
    pub const EMPTY: usize = 0;

    // The word for `Value::Copied`: the tag over the does-not-exist payload.
    pub const COPIED: usize = Value::TAG | Value::EMPTY;

    // Decodes a slot word.
    #[inline]
    pub fn decode(word: usize) -> Value {
        if word == Value::EMPTY {
            Value::Empty
        } else if word & Value::TAG != 0 {
            debug_assert_eq!(word, Value::COPIED);
            Value::Copied
        } else {
            Value::Real(word)
        }
    }

    // Encodes this state as a slot word.
    #[inline]
    pub fn encode(self) -> usize {
        match self {
            Value::Empty => Value::EMPTY,
            Value::Real(value) => {
                debug_assert!(Value::storable(value));
                value
            }
            Value::Copied => Value::COPIED,
        }
    }

    // Returns `true` if `value` can be stored without colliding with a reserved pattern.
    #[inline]
    pub fn storable(value: usize) -> bool {
        value != Value::EMPTY && value & Value::TAG == 0
    }
}

#[test]
fn encoding() {
    assert_eq!(Value::decode(0), Value::Empty);
    assert_eq!(Value::decode(Value::COPIED), Value::Copied);
    assert_eq!(Value::decode(7), Value::Real(7));
    assert_eq!(Value::decode(Value::Real(7).encode()), Value::Real(7));
    assert_eq!(Value::Copied.encode(), Value::TAG);

    assert!(Value::storable(1));
    assert!(Value::storable(Value::TAG - 1));
    assert!(!Value::storable(0));
    assert!(!Value::storable(Value::TAG | 1));
}
