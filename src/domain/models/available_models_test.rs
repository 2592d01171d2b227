use super::estimate_cost;
use super::find_model;
use super::images_need_user_role;
use super::is_low_cost_model;
use super::DEFAULT_MODEL;

#[test]
fn it_finds_the_default_model() {
    let model = find_model(DEFAULT_MODEL).unwrap();
    assert_eq!(model.label, "gpt-4.1-mini");
    assert!(model.low_cost);
}

#[test]
fn it_estimates_cost_per_million_tokens() {
    let cost = estimate_cost("openai/gpt-4.1", 1_000_000, 500_000);
    assert!((cost - 6.0).abs() < 1e-9);
}

#[test]
fn it_prices_unknown_models_at_zero() {
    assert_eq!(estimate_cost("someone/unknown", 1000, 1000), 0.0);
}

#[test]
fn it_flags_low_cost_models() {
    assert!(is_low_cost_model("google/gemini-2.5-flash-preview"));
    assert!(is_low_cost_model("openai/gpt-4o-mini"));
    assert!(!is_low_cost_model("openai/gpt-4.1"));
    assert!(!is_low_cost_model("someone/unknown"));
}

#[test]
fn it_attributes_images_by_provider() {
    assert!(images_need_user_role("openai/gpt-4o"));
    assert!(images_need_user_role("anthropic/claude-sonnet-4"));
    assert!(!images_need_user_role("google/gemini-2.5-pro-preview"));
    assert!(images_need_user_role("someone/unknown"));
}
