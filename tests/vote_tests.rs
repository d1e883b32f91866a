//! Commit/reveal vectors the chain recomputes

use price_feeder::oracle::vote::{
    aggregate_vote_hash, format_rate, generate_exchange_rates_string, generate_salt,
    parse_exchange_rate_tuples,
};
use rust_decimal_macros::dec;
use std::collections::HashMap;

const VALIDATOR: &str = "junovaloper1v9jxgu33ta047h6lta047h6lta047h6l8rg8h5";

#[test]
fn test_prevote_hash_over_rates_string() {
    let prices = HashMap::from([
        ("OSMO".to_string(), dec!(8.69)),
        ("ATOM".to_string(), dec!(40.13)),
        ("JUNO".to_string(), dec!(3.72)),
    ]);

    let rates = generate_exchange_rates_string(&prices);
    assert_eq!(
        rates,
        "ATOM:40.130000000000000000,JUNO:3.720000000000000000,OSMO:8.690000000000000000"
    );

    assert_eq!(
        aggregate_vote_hash("1f2e3d4c", &rates, VALIDATOR),
        "52c63a239219f6959e860fc0835c9da26763f529"
    );
}

#[test]
fn test_rates_round_half_even_at_eighteen_digits() {
    assert_eq!(format_rate(dec!(0.1234567890123456785)), "0.123456789012345678");
    assert_eq!(format_rate(dec!(0.1234567890123456775)), "0.123456789012345678");
    assert_eq!(format_rate(dec!(0.12345678901234567851)), "0.123456789012345679");
}

#[test]
fn test_revealed_rates_parse_back() {
    let salt = generate_salt(32).unwrap();
    let prices = HashMap::from([("ATOM".to_string(), dec!(40.13)), ("JUNO".to_string(), dec!(3.72))]);
    let rates = generate_exchange_rates_string(&prices);

    let tuples = parse_exchange_rate_tuples(&rates).unwrap();
    assert_eq!(tuples.len(), 2);
    assert_eq!(tuples[0].denom, "ATOM");
    assert_eq!(tuples[0].exchange_rate, dec!(40.13));

    // a different salt commits to a different hash
    assert_ne!(
        aggregate_vote_hash(&salt, &rates, VALIDATOR),
        aggregate_vote_hash(&generate_salt(32).unwrap(), &rates, VALIDATOR)
    );
}
