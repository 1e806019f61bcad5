use mdbatch_core::build::{Build, BuildError, BuildState, FileError};
use mdbatch_core::config::{AssetDefaults, Settings};
use mdbatch_core::contract::{
    ConversionResult, EngineError, EngineOptions, MockConversionResult, MockRenderEngine,
};
use mdbatch_core::discover::DiscoveryError;
use mockall::Sequence;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};

/// Lays out assets, an input directory and an output path inside a temp dir.
fn fixture(markdown_files: &[&str]) -> (TempDir, Settings) {
    let tmp = tempdir().unwrap();
    let root = tmp.path();

    let assets = AssetDefaults::in_dir(root.join("assets"));
    fs::create_dir_all(assets.theme.parent().unwrap()).unwrap();
    fs::create_dir_all(assets.template.parent().unwrap()).unwrap();
    fs::write(&assets.theme, "body{}").unwrap();
    fs::write(&assets.highlight_theme, "code{}").unwrap();
    fs::write(&assets.template, "<html>{{content}}</html>").unwrap();

    let input_dir = root.join("docs");
    fs::create_dir_all(&input_dir).unwrap();
    for name in markdown_files {
        fs::write(input_dir.join(name), format!("# {name}\n")).unwrap();
    }

    let settings = Settings {
        images_dir: input_dir.clone(),
        input_dir,
        image_import: None,
        output_dir: root.join("built"),
        build_html: true,
        theme: assets.theme.clone(),
        highlight_theme: assets.highlight_theme.clone(),
        template: assets.template.clone(),
        extend_default_theme: false,
        extend_highlight_theme: false,
        table_of_contents: false,
        keep_extension: false,
        continue_on_error: false,
        assets,
    };
    (tmp, settings)
}

/// A conversion result that records the paths it was asked to write.
fn recording_result(written: Arc<Mutex<Vec<PathBuf>>>) -> Box<dyn ConversionResult> {
    let mut result = MockConversionResult::new();
    let html_log = written.clone();
    result.expect_write_html().returning(move |path: &Path| {
        html_log.lock().unwrap().push(path.to_path_buf());
        Ok(())
    });
    result.expect_write_pdf().returning(move |path: &Path| {
        written.lock().unwrap().push(path.to_path_buf());
        Ok(())
    });
    Box::new(result)
}

#[tokio::test]
async fn test_engine_started_once_and_closed_once_around_all_conversions() {
    let (_tmp, settings) = fixture(&["a.md", "b.md", "c.markdown"]);
    let written = Arc::new(Mutex::new(Vec::new()));

    let mut seq = Sequence::new();
    let mut engine = MockRenderEngine::new();
    engine
        .expect_start()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(()));
    let log = written.clone();
    engine
        .expect_convert()
        .times(3)
        .in_sequence(&mut seq)
        .returning(move |_markdown: &str, _name: &str| Ok(recording_result(log.clone())));
    engine
        .expect_close()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(()));

    let mut build = Build::new(&settings);
    let report = build
        .run(move |_options: EngineOptions| engine)
        .await
        .expect("Build should succeed");

    assert_eq!(build.state(), BuildState::Done);
    assert_eq!(report.artifacts.len(), 6, "HTML and PDF per file");
    assert_eq!(written.lock().unwrap().len(), 6);
    assert!(settings.output_dir.is_dir(), "Output directory should be created");
}

#[tokio::test]
async fn test_report_md_produces_html_and_pdf_named_after_stem() {
    let (_tmp, settings) = fixture(&["report.md"]);
    let written = Arc::new(Mutex::new(Vec::new()));

    let mut engine = MockRenderEngine::new();
    engine.expect_start().times(1).returning(|| Ok(()));
    let log = written.clone();
    engine
        .expect_convert()
        .withf(|markdown: &str, name: &str| name == "report" && markdown.starts_with("# report.md"))
        .times(1)
        .returning(move |_: &str, _: &str| Ok(recording_result(log.clone())));
    engine.expect_close().times(1).returning(|| Ok(()));

    Build::new(&settings)
        .run(move |_| engine)
        .await
        .expect("Build should succeed");

    let written = written.lock().unwrap();
    assert_eq!(
        *written,
        vec![
            settings.output_dir.join("report.html"),
            settings.output_dir.join("report.pdf"),
        ]
    );
}

#[tokio::test]
async fn test_html_is_skipped_when_disabled() {
    let (_tmp, mut settings) = fixture(&["only.md"]);
    settings.build_html = false;

    let mut engine = MockRenderEngine::new();
    engine.expect_start().returning(|| Ok(()));
    engine.expect_convert().returning(|_: &str, _: &str| {
        let mut result = MockConversionResult::new();
        result.expect_write_html().never();
        result.expect_write_pdf().times(1).returning(|_: &Path| Ok(()));
        Ok(Box::new(result) as Box<dyn ConversionResult>)
    });
    engine.expect_close().times(1).returning(|| Ok(()));

    let report = Build::new(&settings).run(move |_| engine).await.unwrap();
    assert_eq!(report.artifacts, vec![settings.output_dir.join("only.pdf")]);
}

#[tokio::test]
async fn test_empty_input_directory_is_fatal_and_engine_is_closed() {
    let (_tmp, settings) = fixture(&[]);
    fs::write(settings.input_dir.join("notes.txt"), "not markdown").unwrap();

    let mut engine = MockRenderEngine::new();
    engine.expect_start().times(1).returning(|| Ok(()));
    engine.expect_convert().never();
    engine.expect_close().times(1).returning(|| Ok(()));

    let mut build = Build::new(&settings);
    let err = build.run(move |_| engine).await.unwrap_err();

    assert!(
        matches!(err, BuildError::Discovery(DiscoveryError::NoMarkdownFiles { .. })),
        "Expected NoMarkdownFiles, got: {err:?}"
    );
    assert_eq!(build.state(), BuildState::Error);
}

#[tokio::test]
async fn test_conversion_failure_aborts_batch_but_closes_engine() {
    let (_tmp, settings) = fixture(&["one.md", "two.md"]);

    let mut engine = MockRenderEngine::new();
    engine.expect_start().times(1).returning(|| Ok(()));
    engine
        .expect_convert()
        .times(1)
        .returning(|_: &str, _: &str| Err(EngineError::Render("boom".into())));
    engine.expect_close().times(1).returning(|| Ok(()));

    let err = Build::new(&settings).run(move |_| engine).await.unwrap_err();
    match err {
        BuildError::File { source: FileError::Convert(_), .. } => {}
        other => panic!("Expected a per-file conversion error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_continue_on_error_converts_remaining_files_and_reports_incomplete() {
    let (_tmp, mut settings) = fixture(&["one.md", "two.md", "three.md"]);
    settings.continue_on_error = true;
    let written = Arc::new(Mutex::new(Vec::new()));

    let mut engine = MockRenderEngine::new();
    engine.expect_start().times(1).returning(|| Ok(()));
    let log = written.clone();
    engine
        .expect_convert()
        .times(3)
        .returning(move |_: &str, name: &str| {
            if name == "two" {
                Err(EngineError::Render("bad table".into()))
            } else {
                Ok(recording_result(log.clone()))
            }
        });
    engine.expect_close().times(1).returning(|| Ok(()));

    let err = Build::new(&settings).run(move |_| engine).await.unwrap_err();
    let report = match err {
        BuildError::Incomplete { report } => report,
        other => panic!("Expected an incomplete build, got: {other:?}"),
    };
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "two.md");
    assert!(report.failures[0].1.contains("bad table"), "got: {:?}", report.failures);
    assert_eq!(report.artifacts.len(), 4, "Two files fully written");
    assert_eq!(written.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_write_failure_still_closes_engine() {
    let (_tmp, settings) = fixture(&["one.md"]);

    let mut engine = MockRenderEngine::new();
    engine.expect_start().times(1).returning(|| Ok(()));
    engine.expect_convert().returning(|_: &str, _: &str| {
        let mut result = MockConversionResult::new();
        result.expect_write_html().returning(|_: &Path| Ok(()));
        result
            .expect_write_pdf()
            .returning(|_: &Path| Err(EngineError::Other("disk full".into())));
        Ok(Box::new(result) as Box<dyn ConversionResult>)
    });
    engine.expect_close().times(1).returning(|| Ok(()));

    let err = Build::new(&settings).run(move |_| engine).await.unwrap_err();
    assert!(matches!(
        err,
        BuildError::File { source: FileError::WritePdf(_), .. }
    ));
}

#[tokio::test]
async fn test_engine_start_failure_never_converts_or_closes() {
    let (_tmp, settings) = fixture(&["one.md"]);

    let mut engine = MockRenderEngine::new();
    engine
        .expect_start()
        .times(1)
        .returning(|| Err(EngineError::Other("no browser".into())));
    engine.expect_convert().never();
    engine.expect_close().never();

    let err = Build::new(&settings).run(move |_| engine).await.unwrap_err();
    assert!(matches!(err, BuildError::Engine(_)));
}

#[tokio::test]
async fn test_close_failure_is_reported_after_successful_batch() {
    let (_tmp, settings) = fixture(&["one.md"]);

    let mut engine = MockRenderEngine::new();
    engine.expect_start().returning(|| Ok(()));
    engine
        .expect_convert()
        .returning(|_: &str, _: &str| Ok(recording_result(Arc::new(Mutex::new(Vec::new())))));
    engine
        .expect_close()
        .times(1)
        .returning(|| Err(EngineError::Other("image server stuck".into())));

    let err = Build::new(&settings).run(move |_| engine).await.unwrap_err();
    assert!(matches!(err, BuildError::Engine(EngineError::Other(_))));
}

#[tokio::test]
async fn test_missing_theme_aborts_before_engine_is_built() {
    let (_tmp, mut settings) = fixture(&["one.md"]);
    settings.theme = settings.input_dir.join("missing.css");

    let err = Build::new(&settings)
        .run(|_: EngineOptions| -> MockRenderEngine {
            panic!("Engine must not be constructed when assets are missing")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::Assets(_)));
}

#[tokio::test]
async fn test_engine_receives_assembled_style_and_template() {
    let (_tmp, mut settings) = fixture(&["one.md"]);
    settings.extend_default_theme = true;
    settings.table_of_contents = true;
    settings.image_import = Some("images".into());

    let captured = Arc::new(Mutex::new(None));
    let sink = captured.clone();

    let mut engine = MockRenderEngine::new();
    engine.expect_start().returning(|| Ok(()));
    engine
        .expect_convert()
        .returning(|_: &str, _: &str| Ok(recording_result(Arc::new(Mutex::new(Vec::new())))));
    engine.expect_close().returning(|| Ok(()));

    Build::new(&settings)
        .run(move |options: EngineOptions| {
            *sink.lock().unwrap() = Some(options);
            engine
        })
        .await
        .unwrap();

    let options = captured.lock().unwrap().clone().expect("factory called");
    assert_eq!(options.style, "body{}body{}code{}");
    assert_eq!(options.template, "<html>{{content}}</html>");
    assert!(options.table_of_contents);
    assert_eq!(options.image_import.as_deref(), Some("images"));
    assert_eq!(options.image_dir, settings.images_dir);
}

#[tokio::test]
async fn test_unreadable_input_directory_still_closes_started_engine() {
    let (_tmp, mut settings) = fixture(&[]);
    settings.input_dir = settings.input_dir.join("missing");

    let mut engine = MockRenderEngine::new();
    engine.expect_start().times(1).returning(|| Ok(()));
    engine.expect_convert().never();
    engine.expect_close().times(1).returning(|| Ok(()));

    let err = Build::new(&settings).run(move |_| engine).await.unwrap_err();
    assert!(
        matches!(err, BuildError::Discovery(DiscoveryError::Unreadable { .. })),
        "Expected Unreadable, got: {err:?}"
    );
}

#[tokio::test]
async fn test_output_path_that_is_a_file_fails_once_and_closes_engine() {
    let (_tmp, settings) = fixture(&["one.md", "two.md"]);
    fs::write(&settings.output_dir, "not a directory").unwrap();

    let mut engine = MockRenderEngine::new();
    engine.expect_start().times(1).returning(|| Ok(()));
    engine.expect_convert().never();
    engine.expect_close().times(1).returning(|| Ok(()));

    let mut build = Build::new(&settings);
    let err = build.run(move |_| engine).await.unwrap_err();
    match err {
        BuildError::OutputDir { dir, .. } => assert_eq!(dir, settings.output_dir),
        other => panic!("Expected an output directory error, got: {other:?}"),
    }
    assert_eq!(build.state(), BuildState::Error);
}

#[tokio::test]
async fn test_start_failure_wins_over_discovery_failure() {
    let (_tmp, mut settings) = fixture(&[]);
    settings.input_dir = settings.input_dir.join("missing");

    let mut engine = MockRenderEngine::new();
    engine
        .expect_start()
        .times(1)
        .returning(|| Err(EngineError::Other("no browser".into())));
    engine.expect_convert().never();
    engine.expect_close().never();

    let err = Build::new(&settings).run(move |_| engine).await.unwrap_err();
    assert!(matches!(err, BuildError::Engine(EngineError::Other(_))), "got: {err:?}");
}
