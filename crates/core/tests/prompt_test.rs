mod common;

use anyhow::Result;
use common::{BOS, EOS, build_tokenizer};
use llava_predict_core::{
    IMAGE_TOKEN_INDEX, KeywordsStoppingCriteria, PromptBuildOptions, get_conv_template,
    known_templates, prompt_tokens::image_slot_count, render_single_turn,
    tokenize_with_image_slots,
};

const SYSTEM: &str = "A chat between a curious human and an artificial intelligence assistant. The assistant gives helpful, detailed, and polite answers to the human's questions.";

#[test]
fn llava_v1_renders_single_turn_prompt() -> Result<()> {
    let (prompt, stop) = render_single_turn("llava_v1", "<image>\nWhat is this?")?;
    assert_eq!(
        prompt,
        format!("{SYSTEM} USER: <image>\nWhat is this? ASSISTANT:")
    );
    assert_eq!(stop, "</s>");
    Ok(())
}

#[test]
fn other_templates_render_their_separators() -> Result<()> {
    let (v0, v0_stop) = render_single_turn("llava_v0", "hi")?;
    assert_eq!(v0, format!("{SYSTEM}###Human: hi###Assistant:"));
    assert_eq!(v0_stop, "###");

    let (mpt, mpt_stop) = render_single_turn("mpt", "hi")?;
    assert!(mpt.ends_with("<|im_start|>user\nhi<|im_end|><|im_start|>assistant\n"));
    assert_eq!(mpt_stop, "<|im_end|>");

    let (plain, plain_stop) = render_single_turn("plain", "<image>")?;
    assert_eq!(plain, "<image>\n");
    assert_eq!(plain_stop, "\n");
    Ok(())
}

#[test]
fn multi_turn_history_alternates_separators() -> Result<()> {
    let mut conv = get_conv_template("llava_v1")?;
    conv.set_system_message("sys".to_owned());
    conv.append_message("USER", Some("a".to_owned()));
    conv.append_message("ASSISTANT", Some("b".to_owned()));
    conv.append_message("USER", Some("c".to_owned()));
    conv.append_message("ASSISTANT", None);
    assert_eq!(conv.get_prompt(), "sys USER: a ASSISTANT: b</s>USER: c ASSISTANT:");
    Ok(())
}

#[test]
fn unknown_template_lists_known_names() {
    let err = get_conv_template("llava_v9").expect_err("unknown template");
    let message = err.to_string();
    for name in known_templates() {
        assert!(message.contains(name), "missing {name} in `{message}`");
    }
}

#[test]
fn image_placeholder_becomes_sentinel_with_single_bos() -> Result<()> {
    let tokenizer = build_tokenizer();
    let options = PromptBuildOptions::for_tokenizer(&tokenizer);
    assert_eq!(options.bos_token_id, Some(BOS));

    let seq = tokenize_with_image_slots(&tokenizer, "USER: <image>\nhi ASSISTANT:", options)?;
    assert_eq!(seq.tokens, vec![1, 8, IMAGE_TOKEN_INDEX, 10, 9]);
    assert_eq!(seq.image_mask, vec![0, 0, 1, 0, 0]);
    assert_eq!(seq.image_token_count(), 1);
    Ok(())
}

#[test]
fn leading_placeholder_keeps_bos_first() -> Result<()> {
    let tokenizer = build_tokenizer();
    let options = PromptBuildOptions::for_tokenizer(&tokenizer);

    let seq = tokenize_with_image_slots(&tokenizer, "<image> hi <image>", options)?;
    assert_eq!(seq.tokens, vec![1, IMAGE_TOKEN_INDEX, 10, IMAGE_TOKEN_INDEX]);
    assert_eq!(image_slot_count("<image> hi <image>"), seq.image_token_count());
    Ok(())
}

#[test]
fn without_bos_segments_are_kept_verbatim() -> Result<()> {
    let tokenizer = build_tokenizer();
    let options = PromptBuildOptions::for_tokenizer(&tokenizer).with_bos(None);

    let seq = tokenize_with_image_slots(&tokenizer, "hi <image> cat", options)?;
    assert_eq!(seq.tokens, vec![1, 10, IMAGE_TOKEN_INDEX, 1, 4]);
    Ok(())
}

#[test]
fn keyword_criteria_match_ids_and_text() -> Result<()> {
    let tokenizer = build_tokenizer();
    let criteria = KeywordsStoppingCriteria::new(&["</s>", "cat sat"], &tokenizer)?;
    assert_eq!(criteria.keywords(), ["</s>", "cat sat"]);

    assert!(criteria.should_stop(&[3, EOS], &tokenizer));
    assert!(criteria.should_stop(&[3, 4, 5], &tokenizer));
    assert!(!criteria.should_stop(&[3, 4], &tokenizer));
    assert!(!criteria.should_stop(&[], &tokenizer));
    Ok(())
}

#[test]
fn keyword_criteria_require_keywords() {
    let tokenizer = build_tokenizer();
    assert!(KeywordsStoppingCriteria::new(&[], &tokenizer).is_err());
}

#[test]
fn keyword_criteria_tolerate_ids_outside_the_vocab() -> Result<()> {
    let tokenizer = build_tokenizer();
    let criteria = KeywordsStoppingCriteria::new(&["cat sat"], &tokenizer)?;

    assert!(!criteria.should_stop(&[3, 4_000], &tokenizer));
    assert!(criteria.should_stop(&[4_000, 4, 5], &tokenizer));
    Ok(())
}
