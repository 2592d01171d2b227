#[cfg(test)]
#[path = "available_models_test.rs"]
mod tests;

pub const DEFAULT_MODEL: &str = "openai/gpt-4.1-mini";

/// Cumulative spend after which the user is nudged to start a new chat.
pub const MAX_CHAT_COST: f64 = 0.75;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AvailableModel {
    pub model: &'static str,
    pub label: &'static str,
    /// USD per million prompt tokens.
    pub prompt_rate: f64,
    /// USD per million completion tokens.
    pub completion_rate: f64,
    /// Usable through the relay without a caller supplied key.
    pub low_cost: bool,
}

pub const AVAILABLE_MODELS: &[AvailableModel] = &[
    AvailableModel {
        model: "google/gemini-2.5-flash-preview",
        label: "gemini-2.5-flash-preview",
        prompt_rate: 0.1,
        completion_rate: 0.4,
        low_cost: true,
    },
    AvailableModel {
        model: "google/gemini-2.5-pro-preview",
        label: "gemini-2.5-pro-preview",
        prompt_rate: 1.25,
        completion_rate: 10.0,
        low_cost: false,
    },
    AvailableModel {
        model: "anthropic/claude-3.5-sonnet",
        label: "claude-3.5-sonnet",
        prompt_rate: 3.0,
        completion_rate: 15.0,
        low_cost: false,
    },
    AvailableModel {
        model: "anthropic/claude-3.7-sonnet",
        label: "claude-3.7-sonnet",
        prompt_rate: 3.0,
        completion_rate: 15.0,
        low_cost: false,
    },
    AvailableModel {
        model: "anthropic/claude-sonnet-4",
        label: "claude-sonnet-4",
        prompt_rate: 3.0,
        completion_rate: 15.0,
        low_cost: false,
    },
    AvailableModel {
        model: "openai/gpt-4o",
        label: "gpt-4o",
        prompt_rate: 2.5,
        completion_rate: 10.0,
        low_cost: false,
    },
    AvailableModel {
        model: "openai/gpt-4o-mini",
        label: "gpt-4o-mini",
        prompt_rate: 0.15,
        completion_rate: 0.6,
        low_cost: true,
    },
    AvailableModel {
        model: "openai/gpt-4.1",
        label: "gpt-4.1",
        prompt_rate: 2.0,
        completion_rate: 8.0,
        low_cost: false,
    },
    AvailableModel {
        model: "openai/gpt-4.1-mini",
        label: "gpt-4.1-mini",
        prompt_rate: 0.4,
        completion_rate: 1.6,
        low_cost: true,
    },
    AvailableModel {
        model: "deepseek/deepseek-r1-0528",
        label: "deepseek-r1-0528",
        prompt_rate: 0.5,
        completion_rate: 2.18,
        low_cost: false,
    },
];

pub fn find_model(model: &str) -> Option<&'static AvailableModel> {
    return AVAILABLE_MODELS.iter().find(|m| return m.model == model);
}

pub fn is_low_cost_model(model: &str) -> bool {
    return find_model(model).map(|m| return m.low_cost).unwrap_or(false);
}

/// Estimated USD cost of a call. Unknown models are priced at zero.
pub fn estimate_cost(model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    let (prompt_rate, completion_rate) = find_model(model)
        .map(|m| return (m.prompt_rate, m.completion_rate))
        .unwrap_or((0.0, 0.0));

    return (prompt_tokens as f64 * prompt_rate + completion_tokens as f64 * completion_rate)
        / 1_000_000.0;
}

/// Some providers reject image parts on assistant authored messages, so
/// images produced by tools are attributed to the user for them.
pub fn images_need_user_role(model: &str) -> bool {
    if find_model(model).is_none() {
        return true;
    }

    return model.starts_with("openai/") || model.starts_with("anthropic/");
}
