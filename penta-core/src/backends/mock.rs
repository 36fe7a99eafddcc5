use async_trait::async_trait;

use crate::{GenerationBackend, GenerationError, GenerationParams, RawOutput};

const CANNED_REPLIES: &[(&str, &str)] = &[
    ("olá", "Olá! Como posso ajudar você hoje?"),
    ("ajuda", "Claro! Estou aqui para te auxiliar."),
    ("teste", "Este é um teste do modelo fake. Tudo funcionando!"),
];

/// Deterministic stand-in for a text model. Never fails and never touches the
/// network.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockBackend;

/// First canned reply whose keyword occurs in the prompt (case-insensitive),
/// otherwise a reply echoing the prompt and sampling parameters.
pub fn mock_reply(prompt: &str, max_length: usize, temperature: f64) -> String {
    let lowered = prompt.to_lowercase();
    CANNED_REPLIES
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, reply)| reply.to_string())
        .unwrap_or_else(|| {
            format!(
                "[RESPOSTA SIMULADA] Prompt: {prompt}, max_length: {max_length}, temperature: {}",
                float_repr(temperature)
            )
        })
}

/// Shortest round-trip rendering with a signed, two-digit exponent:
/// `1.0`, `0.0001`, `1e-07`, `1.5e+16`.
fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    // Debug switches to exponent form at the same thresholds (1e-4, 1e16).
    let repr = format!("{value:?}");
    match repr.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => repr,
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn generate(&self, params: &GenerationParams) -> Result<RawOutput, GenerationError> {
        Ok(RawOutput::Text(mock_reply(
            &params.prompt,
            params.max_length,
            params.temperature,
        )))
    }
}
