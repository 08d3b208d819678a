/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

const PRICES: &[(&str, ModelPrice)] = &[
    ("claude-3-5-sonnet-20241022", ModelPrice { input: 3.0, output: 15.0 }),
    ("claude-3-haiku-20240307", ModelPrice { input: 0.25, output: 1.25 }),
    ("gpt-4o", ModelPrice { input: 2.5, output: 10.0 }),
    ("gpt-4o-mini", ModelPrice { input: 0.15, output: 0.6 }),
    ("gpt-4-turbo", ModelPrice { input: 10.0, output: 30.0 }),
    ("gemini-1.5-pro", ModelPrice { input: 1.25, output: 5.0 }),
    ("gemini-1.5-flash", ModelPrice { input: 0.075, output: 0.3 }),
    ("gemini-2.0-flash", ModelPrice { input: 0.1, output: 0.4 }),
    ("glm-4-plus", ModelPrice { input: 0.5, output: 0.5 }),
    ("glm-4-flash", ModelPrice { input: 0.01, output: 0.01 }),
    ("llama3:8b", ModelPrice { input: 0.0, output: 0.0 }),
    ("mistral:7b", ModelPrice { input: 0.0, output: 0.0 }),
    ("qwen2.5:7b", ModelPrice { input: 0.0, output: 0.0 }),
];

pub fn price_for(model: &str) -> Option<ModelPrice> {
    PRICES.iter().find(|(name, _)| *name == model).map(|(_, price)| *price)
}

/// Unknown models cost nothing.
pub fn calculate_cost(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    match price_for(model) {
        Some(price) => {
            (f64::from(input_tokens) * price.input + f64::from(output_tokens) * price.output) / 1_000_000.0
        }
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_cost_per_million_tokens() {
        let cost = calculate_cost("claude-3-5-sonnet-20241022", 1000, 500);
        assert!((cost - 0.0105).abs() < 1e-12);
    }

    #[test]
    fn unknown_models_are_free() {
        assert_eq!(calculate_cost("some-new-model", 10_000, 10_000), 0.0);
        assert!(price_for("gpt-4o-2099").is_none());
    }

    #[test]
    fn local_models_are_free() {
        assert_eq!(calculate_cost("llama3:8b", 50_000, 50_000), 0.0);
    }
}
