//! Serialization roundtrip checks shared by the workspace's type tests.

use std::{
    fmt::{Debug, Display},
    str::FromStr,
};

use proptest::{
    arbitrary::{Arbitrary, any},
    prop_assert_eq, proptest,
    strategy::Strategy,
    test_runner::Config,
};
use serde::{Serialize, de::DeserializeOwned};

/// Checks `T -> serde_json::Value -> T` for object-like types. Values are
/// compared instead of strings since object key order may differ.
pub fn json_value_roundtrip_proptest<T>()
where
    T: Arbitrary + PartialEq + Serialize + DeserializeOwned,
{
    json_value_custom(any::<T>(), Config::default());
}

/// Like [`json_value_roundtrip_proptest`], for types generated by an ad-hoc
/// strategy or which need fewer cases.
pub fn json_value_custom<S, T>(strategy: S, config: Config)
where
    S: Strategy<Value = T>,
    T: PartialEq + Serialize + DeserializeOwned + Debug,
{
    proptest!(config, |(before in strategy)| {
        let json = serde_json::to_value(&before).unwrap();
        let after: T = serde_json::from_value(json.clone()).unwrap();

        prop_assert_eq!(&after, &before);
        prop_assert_eq!(serde_json::to_value(&after).unwrap(), json);
    });
}

/// Checks `T -> JSON text -> T` for types encoded as a single JSON scalar,
/// e.g. hex strings or integers.
pub fn json_string_roundtrip_proptest<T>()
where
    T: Arbitrary + PartialEq + Serialize + DeserializeOwned,
{
    proptest!(|(before in any::<T>())| {
        let text = serde_json::to_string(&before).unwrap();
        prop_assert_eq!(serde_json::from_str::<T>(&text).unwrap(), before);
    });
}

/// Checks that `T::from_str` parses everything `T`'s [`Display`] emits.
pub fn fromstr_display_roundtrip_proptest<T>()
where
    T: Arbitrary + PartialEq + FromStr + Display,
    <T as FromStr>::Err: Debug,
{
    proptest!(|(before in any::<T>())| {
        let after = before.to_string().parse::<T>().unwrap();
        prop_assert_eq!(after, before);
    });
}

/// Pins the JSON names of every variant of a unit enum. `expected_ser` is
/// the JSON array of all variants in declaration order.
pub fn json_unit_enum_backwards_compat<T>(expected_ser: &str)
where
    T: Clone + PartialEq + Debug + Serialize + DeserializeOwned,
    T: strum::VariantArray,
{
    let variants = T::VARIANTS.to_vec();
    let actual_ser = serde_json::to_string(&variants).unwrap();
    assert_eq!(
        actual_ser, expected_ser,
        "Variant names are matched on by subscribers; renaming one breaks \
         them. Update `expected_ser` only when adding a variant.",
    );

    let parsed = serde_json::from_str::<Vec<T>>(expected_ser).unwrap();
    assert_eq!(parsed, variants);
}
