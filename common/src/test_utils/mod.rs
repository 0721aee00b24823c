/// `Arbitrary`-like proptest strategies for foreign types.
pub mod arbitrary;
/// Quickly create roundtrip proptests for serialization schemes.
pub mod roundtrip;
