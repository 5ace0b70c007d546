mod common;

use common::{engine_section, test_platform, FakeNode, FakeSurface, Visibility};
use plume_core::engine::{ActionEngine, ActionTarget, ResolveOptions, SubmitMethod};
use plume_core::ops;
use serde_json::json;

const NOTE_URL: &str = "https://social.example/explore/64fe32ab?xsec_token=tok&xsec_source=";

fn engine() -> ActionEngine {
    ActionEngine::new("testplat", engine_section())
}

/// A page modeling the real conflict: the comment input only resolves while
/// the page carries no read residue, and reading comments expands/scrolls.
fn conflicted_page() -> FakeSurface {
    let mut surface = FakeSurface::new(vec![
        FakeNode::new("div.comments"),
        FakeNode::new("#comment-input").visibility(Visibility::WhenPristine),
        FakeNode::new("button.send").clears_input_on_click(),
        FakeNode::new("div.comment-item"),
    ]);
    surface.input_selector = "#comment-input".into();
    surface.comment_payload = json!([
        { "author": "ada", "body": "lovely write-up", "timestamp": "2d ago" },
        { "author": "brin", "body": "bookmarked", "timestamp": "1d ago" },
    ]);
    surface
}

#[tokio::test]
async fn read_comments_returns_content_and_leaves_a_state_token() {
    let mut surface = conflicted_page();
    let harvest = ops::read_comments(&engine(), &mut surface, &test_platform(), NOTE_URL, 3)
        .await
        .unwrap();
    assert_eq!(harvest.comments.len(), 2);
    assert_eq!(harvest.comments[0].author, "ada");
    // The token records the residue the read left behind.
    assert!(!harvest.page_state.is_pristine());
    assert_eq!(harvest.page_state.expanded_panels, vec!["comments"]);
}

#[tokio::test]
async fn post_after_read_still_resolves_the_input() {
    let mut surface = conflicted_page();
    let platform = test_platform();
    let engine = engine();

    // A read runs first and corrupts the page for naive input resolution.
    let harvest = ops::read_comments(&engine, &mut surface, &platform, NOTE_URL, 3)
        .await
        .unwrap();
    assert!(!harvest.page_state.is_pristine());

    // Direct resolution without the reset contract fails on this page, which
    // is exactly why post_comment must not rely on it.
    let naive = engine
        .resolve(
            &mut surface,
            ActionTarget::CommentInput,
            &platform.targets.comment_input,
            &ResolveOptions::default(),
        )
        .await;
    assert!(naive.is_err());

    // The posting operation with default settings reconciles first and lands.
    let report = ops::post_comment(&engine, &mut surface, &platform, NOTE_URL, "great read")
        .await
        .unwrap();
    assert_eq!(report.method, SubmitMethod::Control);
    assert!(surface.resets >= 1);
    assert!(surface.echoed_texts.contains(&"great read".to_string()));
}

#[tokio::test]
async fn post_requires_the_access_token_parameter() {
    let mut surface = conflicted_page();
    let err = ops::post_comment(
        &engine(),
        &mut surface,
        &test_platform(),
        "https://social.example/explore/64fe32ab",
        "great read",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ops::OpError::InvalidInput(_)));
    // Nothing was typed or navigated for an unroutable url.
    assert!(surface.navigations.is_empty());
}

#[tokio::test]
async fn empty_comment_is_rejected_before_touching_the_page() {
    let mut surface = conflicted_page();
    let err = ops::post_comment(&engine(), &mut surface, &test_platform(), NOTE_URL, "  ")
        .await
        .unwrap_err();
    assert!(matches!(err, ops::OpError::InvalidInput(_)));
    assert!(surface.navigations.is_empty());
}
