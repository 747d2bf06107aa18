use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// USD per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRate {
    pub input_per_1k: Decimal,
    pub output_per_1k: Decimal,
}

// Longest prefix wins, so dated snapshots like gpt-4o-mini-2024-07-18 resolve.
const MODEL_RATES: &[(&str, ModelRate)] = &[
    (
        "gpt-4o-mini",
        ModelRate {
            input_per_1k: dec!(0.00015),
            output_per_1k: dec!(0.0006),
        },
    ),
    (
        "gpt-4o",
        ModelRate {
            input_per_1k: dec!(0.0025),
            output_per_1k: dec!(0.01),
        },
    ),
    (
        "gpt-4-turbo",
        ModelRate {
            input_per_1k: dec!(0.01),
            output_per_1k: dec!(0.03),
        },
    ),
    (
        "gpt-3.5-turbo",
        ModelRate {
            input_per_1k: dec!(0.0005),
            output_per_1k: dec!(0.0015),
        },
    ),
];

const DATA_PROVIDER_RATES: &[(&str, Decimal)] = &[
    ("yahoo_finance", dec!(0)),
    ("alpha_vantage", dec!(0.01)),
    ("redis", dec!(0.001)),
];

pub fn model_rate(model: &str) -> Option<ModelRate> {
    let model = model.trim().to_ascii_lowercase();
    MODEL_RATES
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, rate)| *rate)
}

/// Cost of one completion, `None` for models without a known rate.
pub fn token_cost(model: &str, input_tokens: u32, output_tokens: u32) -> Option<Decimal> {
    let rate = model_rate(model)?;
    let thousand = Decimal::from(1000);
    Some(
        Decimal::from(input_tokens) * rate.input_per_1k / thousand
            + Decimal::from(output_tokens) * rate.output_per_1k / thousand,
    )
}

pub fn data_request_rate(provider: &str) -> Decimal {
    DATA_PROVIDER_RATES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(provider))
        .map(|(_, rate)| *rate)
        .unwrap_or(Decimal::ZERO)
}
