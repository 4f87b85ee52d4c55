use super::{ocr_text, template, widget, Call, MockEngine};
use crate::locator::{Alternative, ElementLocator};
use crate::selector::Target;
use crate::types::{Bounds, LocateStrategy};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn locator(engine: &Arc<MockEngine>, ocr_enabled: bool) -> ElementLocator {
    ElementLocator::new(engine.clone(), ocr_enabled)
}

#[tokio::test(start_paused = true)]
async fn test_structural_match_skips_other_providers() {
    let engine = Arc::new(MockEngine::new());
    let bounds = Bounds::new(100, 100, 300, 200);
    engine.set_widget("签到", bounds);
    engine.set_template("sign", bounds);
    engine.set_ocr("签到", vec![ocr_text(bounds, "签到")]);

    let target = Target::text("签到")
        .or_image(Some(template("sign")))
        .or_ocr("签到");
    let found = locator(&engine, true).locate(&target).await.unwrap();

    assert_eq!(found.strategy, LocateStrategy::Structural);
    assert_eq!(found.center, bounds.center());
    assert_eq!(engine.calls(), vec![Call::Query("签到".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_template_fallback_reuses_screenshot_for_ocr() {
    let engine = Arc::new(MockEngine::new());
    let bounds = Bounds::new(600, 2000, 700, 2100);
    engine.set_ocr("我的", vec![ocr_text(bounds, "我的")]);

    let target = Target::id("com.yaya.zone:id/ani_mine")
        .or_image(Some(template("mine")))
        .or_ocr("我的");
    let found = locator(&engine, true).locate(&target).await.unwrap();

    assert_eq!(found.strategy, LocateStrategy::Ocr);
    assert_eq!(found.label(), "我的");
    assert_eq!(engine.count(|c| *c == Call::Capture), 1);
    assert_eq!(engine.count(|c| matches!(c, Call::Template(_))), 1);
}

#[tokio::test(start_paused = true)]
async fn test_template_match_normalized() {
    let engine = Arc::new(MockEngine::new());
    let bounds = Bounds::new(10, 20, 30, 60);
    engine.set_template("fishpond_entry", bounds);

    let found = locator(&engine, true)
        .locate(&Target::image(template("fishpond_entry")))
        .await
        .unwrap();
    assert_eq!(found.strategy, LocateStrategy::Template);
    assert_eq!(found.center, bounds.center());
    assert_eq!(engine.count(|c| matches!(c, Call::Query(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_region_filter_applies_to_every_strategy() {
    let engine = Arc::new(MockEngine::new());
    let region = Bounds::new(540, 234, 1080, 1404);
    let outside = Bounds::new(10, 10, 100, 100);
    engine.set_widget("点击.*取", outside);
    engine.set_template("claim", outside);
    engine.set_ocr("点击.*取", vec![ocr_text(outside, "点击领取")]);

    let target = Target::text("点击.*取")
        .or_image(Some(template("claim")))
        .or_ocr("点击.*取")
        .within(region);
    let locator = locator(&engine, true);
    assert!(locator.locate(&target).await.is_none());

    let inside = Bounds::new(800, 600, 900, 700);
    engine.set_ocr(
        "点击.*取",
        vec![ocr_text(outside, "点击领取"), ocr_text(inside, "点击领取")],
    );
    let found = locator.locate(&target).await.unwrap();
    assert_eq!(found.bounds, inside);
    assert_eq!(found.strategy, LocateStrategy::Ocr);
}

#[tokio::test(start_paused = true)]
async fn test_first_candidate_in_provider_order_wins() {
    let engine = Arc::new(MockEngine::new());
    let first = Bounds::new(0, 0, 10, 10);
    let second = Bounds::new(20, 20, 30, 30);
    engine.set_widgets(
        "android.view.View",
        vec![widget(first, ""), widget(second, "")],
    );
    let locator = locator(&engine, true);
    let target = Target::class_name("android.view.View");
    assert_eq!(locator.locate(&target).await.unwrap().bounds, first);
    assert_eq!(locator.locate_all(&target).await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_ocr_disabled_never_calls_provider() {
    let engine = Arc::new(MockEngine::new());
    engine.set_ocr("我的淘宝", vec![ocr_text(Bounds::new(0, 0, 10, 10), "我的淘宝")]);

    let found = locator(&engine, false)
        .locate(&Target::ocr("我的淘宝"))
        .await;
    assert!(found.is_none());
    assert_eq!(engine.count(|c| matches!(c, Call::Ocr(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ocr_label_must_match_whole_pattern() {
    let engine = Arc::new(MockEngine::new());
    engine.set_ocr("我的", vec![ocr_text(Bounds::new(0, 0, 10, 10), "我的淘宝")]);
    assert!(locator(&engine, true)
        .locate(&Target::ocr("我的"))
        .await
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn test_missing_screenshot_means_not_found() {
    let engine = Arc::new(MockEngine::new());
    engine.disable_capture();
    engine.set_ocr("我的", vec![ocr_text(Bounds::new(0, 0, 10, 10), "我的")]);
    assert!(locator(&engine, true)
        .locate(&Target::ocr("我的"))
        .await
        .is_none());
    assert_eq!(engine.count(|c| matches!(c, Call::Ocr(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_alternative_reports_which_target_appeared() {
    let engine = Arc::new(MockEngine::new());
    let bounds = Bounds::new(400, 900, 700, 1000);
    engine.script_widgets("今日已签到", vec![vec![], vec![widget(bounds, "今日已签到")]]);

    let result = locator(&engine, true)
        .alternative(
            &Target::text("立即签到"),
            &Target::text("今日已签到"),
            Duration::from_secs(3),
        )
        .await;
    assert!(matches!(result, Alternative::Second(m) if m.bounds == bounds));
}

#[tokio::test(start_paused = true)]
async fn test_alternative_gives_up_after_timeout() {
    let engine = Arc::new(MockEngine::new());
    let started = Instant::now();
    let result = locator(&engine, true)
        .alternative(&Target::text("去使用"), &Target::text("立即领"), Duration::from_secs(3))
        .await;
    assert_eq!(result, Alternative::Neither);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_probe_times_out_with_nothing() {
    let engine = Arc::new(MockEngine::new());
    let started = Instant::now();
    let found = locator(&engine, true)
        .probe(&Target::class_name("android.view.View"), Duration::from_secs(5))
        .await;
    assert!(found.is_empty());
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_probe_returns_late_candidates() {
    let engine = Arc::new(MockEngine::new());
    let bounds = Bounds::new(100, 100, 200, 200);
    engine.script_widgets(
        "android.view.View",
        vec![vec![], vec![widget(bounds, ""), widget(bounds, "")]],
    );
    let target = Target::class_name("android.view.View").timeout(Duration::from_secs(1));
    let found = locator(&engine, true)
        .probe(&target, Duration::from_secs(5))
        .await;
    assert_eq!(found.len(), 2);
}
