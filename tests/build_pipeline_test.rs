//! End-to-end tests for the build-time pipeline over a site tree.

mod common;

use common::fixtures::{DARK, LIGHT};
use common::{assert_two_tone, TestSite};
use duodither::models::{PageContext, RunMode};
use duodither::services::{BuildCache, DitherTransform, SiteBuilder};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;

fn builder(site: &TestSite) -> SiteBuilder {
    SiteBuilder::new(Arc::new(DitherTransform::new(
        site.config.clone(),
        RunMode::default(),
    )))
}

#[tokio::test]
async fn test_build_shares_renders_across_pages() {
    let site = TestSite::themed();
    site.add_image("posts/sky.png", 1000, 500);
    site.add_page(
        "index.html",
        r#"<main><img src="/assets/img/posts/sky.png" alt="Sky"></main>"#,
    );
    site.add_page(
        "posts/sky/index.html",
        r#"<article><img src="/assets/img/posts/sky.png" alt="Sky again"></article>"#,
    );

    let cache = BuildCache::new();
    let report = builder(&site).build(&cache).await.unwrap();

    assert_eq!(report.pages, 2);
    assert_eq!(report.rewritten, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(cache.render_count(), 1);

    let files = site.dithered_files();
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("posts/sky-"));
    assert!(files[0].ends_with("-small.png"));

    let url = format!("/assets/img/dither/{}", files[0]);
    assert!(site.read_page("index.html").contains(&url));
    assert!(site.read_page("posts/sky/index.html").contains(&url));

    // Small variant: half of the 640px main width from the theme
    let rendered = site.config.dither_output_dir().join(&files[0]);
    assert_eq!(image::image_dimensions(&rendered).unwrap(), (320, 160));
    assert_two_tone(&std::fs::read(&rendered).unwrap(), LIGHT, DARK);
}

#[tokio::test]
async fn test_second_build_reuses_existing_files() {
    let site = TestSite::themed();
    site.add_image("a.png", 200, 100);
    site.add_page("index.html", r#"<img class="imgPrincipal" src="/assets/img/a.png">"#);

    let first = BuildCache::new();
    builder(&site).build(&first).await.unwrap();
    assert_eq!(first.render_count(), 1);

    let files = site.dithered_files();
    let rendered = site.config.dither_output_dir().join(&files[0]);
    let written_at = std::fs::metadata(&rendered).unwrap().modified().unwrap();

    // Rewritten pages are stable: their references no longer resolve to
    // source images, so a rebuild leaves them and the files alone
    let second = BuildCache::new();
    let report = builder(&site).build(&second).await.unwrap();
    assert_eq!(report.rewritten, 0);
    assert_eq!(second.render_count(), 0);
    assert_eq!(site.dithered_files(), files);
    assert_eq!(
        std::fs::metadata(&rendered).unwrap().modified().unwrap(),
        written_at
    );

    // Never upscaled: 200px source stays 200px for the large variant
    assert_eq!(image::image_dimensions(&rendered).unwrap(), (200, 100));
}

#[tokio::test]
async fn test_fresh_transform_trusts_existing_output() {
    let site = TestSite::themed();
    site.add_image("a.png", 64, 32);
    let transform = DitherTransform::new(site.config.clone(), RunMode::default());
    let html = r#"<img src="/assets/img/a.png">"#;
    let out_path = Path::new("index.html");

    let first = BuildCache::new();
    let a = transform
        .transform(&first, html, out_path, &PageContext::default())
        .await;
    let second = BuildCache::new();
    let b = transform
        .transform(&second, html, out_path, &PageContext::default())
        .await;

    assert_eq!(a, b);
    assert_eq!(first.render_count(), 1);
    assert_eq!(second.render_count(), 0);
}

#[tokio::test]
async fn test_changed_source_gets_new_name() {
    let site = TestSite::themed();
    site.add_image("a.png", 64, 32);
    let transform = DitherTransform::new(site.config.clone(), RunMode::default());
    let html = r#"<img src="/assets/img/a.png">"#;

    let cache = BuildCache::new();
    let before = transform
        .transform(&cache, html, Path::new("index.html"), &PageContext::default())
        .await;

    // A different size always changes the file length
    site.add_image("a.png", 96, 48);
    let cache = BuildCache::new();
    let after = transform
        .transform(&cache, html, Path::new("index.html"), &PageContext::default())
        .await;

    assert_ne!(before, after);
    assert_eq!(cache.render_count(), 1);
    assert_eq!(site.dithered_files().len(), 2);
}

#[tokio::test]
async fn test_front_matter_opt_out_keeps_page() {
    let site = TestSite::themed();
    site.add_image("a.png", 64, 32);
    site.add_source("posts/plain.md", "---\ntitle: Plain\nnoDither: true\n---\nBody\n");
    let transform = DitherTransform::new(site.config.clone(), RunMode::default());
    let html = r#"<img src="/assets/img/a.png" alt="x">"#;

    let cache = BuildCache::new();
    let out = transform
        .transform(
            &cache,
            html,
            Path::new("posts/plain/index.html"),
            &PageContext::with_input_path("posts/plain.md"),
        )
        .await;

    assert_eq!(out, html);
    assert_eq!(cache.render_count(), 0);
    assert!(site.dithered_files().is_empty());
    assert!(site.config.output_dir().join("assets/img/a.png").is_file());
}

#[tokio::test]
async fn test_remote_and_unsupported_sources_untouched() {
    let site = TestSite::themed();
    let transform = DitherTransform::new(site.config.clone(), RunMode::default());
    let html = concat!(
        r#"<img src="https://cdn.example/assets/img/a.png">"#,
        r#"<img src="/assets/img/anim.gif">"#,
        r#"<img src="data:image/png;base64,AAAA">"#,
        r#"<img alt="no source">"#,
    );

    let cache = BuildCache::new();
    let out = transform
        .transform(&cache, html, Path::new("index.html"), &PageContext::default())
        .await;

    assert_eq!(out, html);
    assert_eq!(cache.render_count(), 0);
}

#[tokio::test]
async fn test_undecodable_source_keeps_reference_and_stages_original() {
    let site = TestSite::themed();
    let source = site.config.image_dir().join("bad.png");
    std::fs::write(&source, b"not really a png").unwrap();
    let transform = DitherTransform::new(site.config.clone(), RunMode::default());
    let html = r#"<img src="/assets/img/bad.png">"#;

    let cache = BuildCache::new();
    let out = transform
        .transform(&cache, html, Path::new("index.html"), &PageContext::default())
        .await;

    assert_eq!(out, html);
    assert!(site.dithered_files().is_empty());
    let staged = site.config.output_dir().join("assets/img/bad.png");
    assert_eq!(std::fs::read(staged).unwrap(), b"not really a png");
}

#[tokio::test]
async fn test_build_runs_on_spawned_task() {
    let site = TestSite::themed();
    site.add_image("a.png", 40, 20);
    site.add_page("index.html", r#"<img src="/assets/img/a.png">"#);
    let builder = Arc::new(builder(&site));

    let report = tokio::spawn(async move {
        let cache = BuildCache::new();
        builder.build(&cache).await.unwrap()
    })
    .await
    .unwrap();

    assert_eq!(report.rewritten, 1);
    assert_eq!(site.dithered_files().len(), 1);
}
