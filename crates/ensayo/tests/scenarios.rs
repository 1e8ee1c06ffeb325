//! End-to-end suites against the simulated practice site.
//!
//! Each suite goes through the public API only: a runner, a launcher, and
//! test bodies written the way user code would be.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use ensayo::simulated::{the_internet, Node, PageSpec, Site};
use ensayo::{
    expect, ContextState, EnsayoError, ErrorKind, HandledBy, ParamTable, TestStatus, TestSuite,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use support::{assert_all_passed, open, run, run_with, session_on};

// ============================================================================
// Scenario A: dynamic controls
// ============================================================================

#[tokio::test]
async fn test_enable_control_waits_for_attribute_removal() {
    let suite = TestSuite::new("dynamic controls").test("enable input", |ctx| async move {
        let page = ctx.new_page().await?;
        page.goto(&the_internet::url("/dynamic_controls")).await?;

        page.locator("#input-example button:has-text(\"Enable\")")?
            .click()
            .await?;
        let input = page.locator("#input-example input[type=\"text\"]")?;
        expect(input.clone()).to_be_enabled().await?;
        assert!(input.is_enabled().await?);
        expect(page.locator("#message")?)
            .to_have_text("It's enabled!")
            .await
    });
    let report = run(suite).await;
    assert_all_passed(&report);
}

#[tokio::test]
async fn test_enable_succeeds_just_inside_the_timeout() {
    let site = Site::new().page(
        "https://slow.test/controls",
        PageSpec::new(
            "Slow",
            Node::new("body").children([
                Node::new("input")
                    .attr("type", "text")
                    .attr("disabled", ""),
                Node::new("button").text("Enable"),
            ]),
        )
        .on_click("button", |_, fx| {
            fx.after(700).remove_attr("input", "disabled");
        }),
    );
    let session = session_on(site, 1_000);
    let page = session.new_page().await.unwrap();
    page.goto("https://slow.test/controls").await.unwrap();

    page.get_by_text("Enable").unwrap().click().await.unwrap();
    let started = Instant::now();
    expect(page.locator("input").unwrap())
        .to_be_enabled()
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(600));
}

#[tokio::test]
async fn test_dynamic_loading_shows_hidden_element() {
    let suite = TestSuite::new("dynamic loading").test("hidden element", |ctx| async move {
        let page = ctx.new_page().await?;
        page.goto(&the_internet::url("/dynamic_loading/1")).await?;
        let finish = page.locator("#finish h4")?;
        expect(finish.clone()).to_be_hidden().await?;

        page.click("#start button").await?;
        expect(page.locator("#loading")?).to_be_visible().await?;
        expect(finish.clone()).to_be_visible().await?;
        expect(finish).to_have_text("Hello World!").await?;
        expect(page.locator("#loading")?).to_be_hidden().await
    });
    let report = run(suite).await;
    assert_all_passed(&report);
}

// ============================================================================
// Scenario B: JavaScript alert
// ============================================================================

#[tokio::test]
async fn test_alert_handled_once_with_expected_message() {
    let suite = TestSuite::new("alerts").test("js alert", |ctx| async move {
        let page = ctx.new_page().await?;
        page.goto(&the_internet::url("/javascript_alerts")).await?;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let pending = page.once_dialog(move |dialog| {
            sink.lock().unwrap().push(dialog.message().to_string());
            dialog.accept();
        });
        page.click("button[onclick=\"jsAlert()\"]").await?;
        let dialog = pending.await?;

        assert_eq!(dialog.message(), "I am a JS Alert");
        assert_eq!(*seen.lock().unwrap(), vec!["I am a JS Alert".to_string()]);
        expect(page.locator("#result")?)
            .to_have_text("You successfully clicked an alert")
            .await
    });
    let report = run(suite).await;
    assert_all_passed(&report);
}

#[tokio::test]
async fn test_once_handler_does_not_answer_the_second_dialog() {
    let (session, page) = open("/javascript_alerts").await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let _pending = page.once_dialog(move |dialog| {
        counter.fetch_add(1, Ordering::SeqCst);
        dialog.accept();
    });

    page.click("button[onclick=\"jsConfirm()\"]").await.unwrap();
    assert_eq!(page.text_content("#result").await.unwrap(), "You clicked: Ok");
    page.click("button[onclick=\"jsConfirm()\"]").await.unwrap();
    assert_eq!(
        page.text_content("#result").await.unwrap(),
        "You clicked: Cancel"
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let handled: Vec<HandledBy> = session
        .interceptor()
        .records()
        .iter()
        .map(|r| r.handled_by)
        .collect();
    assert_eq!(handled, vec![HandledBy::Once, HandledBy::Default]);
}

#[tokio::test]
async fn test_slow_dialog_handler_exceeds_the_grace_period() {
    let suite = TestSuite::new("slow handler").test("slow alert", |ctx| async move {
        let page = ctx.new_page().await?;
        page.goto(&the_internet::url("/javascript_alerts")).await?;
        let _pending = page.once_dialog(|dialog| {
            std::thread::sleep(Duration::from_millis(1_000));
            dialog.accept();
        });
        page.click("button[onclick=\"jsAlert()\"]").await
    });
    let started = Instant::now();
    let report = run_with(support::config().with_dialog_grace(200), suite).await;

    let entry = report.result("slow alert").unwrap();
    assert_eq!(entry.status, TestStatus::Failed);
    assert_eq!(
        entry.error.as_ref().unwrap().kind,
        ErrorKind::HandlerTimeout
    );
    assert!(started.elapsed() < Duration::from_millis(900));
}

// ============================================================================
// Scenario C: new window
// ============================================================================

#[tokio::test]
async fn test_new_window_is_tracked_and_loaded() {
    let suite = TestSuite::new("windows").test("open new window", |ctx| async move {
        let page = ctx.new_page().await?;
        page.goto(&the_internet::url("/windows")).await?;

        let link = page.locator("text=Click Here")?;
        let popup = page.wait_for_popup(|| link.click()).await?;

        assert_eq!(page.popups(), vec![popup.clone()]);
        let state = ctx
            .session()
            .contexts()
            .context(popup.context())
            .map(|c| c.state);
        assert_eq!(state, Some(ContextState::Loaded));
        expect(popup.locator("h3")?).to_have_text("New Window").await?;
        assert_eq!(page.title().await?, "The Internet");
        Ok(())
    });
    let report = run(suite).await;
    assert_all_passed(&report);
}

// ============================================================================
// File upload
// ============================================================================

#[tokio::test]
async fn test_upload_sends_suite_artifact() {
    let uploaded = Arc::new(Mutex::new(None::<PathBuf>));
    let seen = Arc::clone(&uploaded);
    let finalized = Arc::new(AtomicUsize::new(0));
    let finalizer = Arc::clone(&finalized);
    let suite = TestSuite::new("upload")
        .artifact("upload-payload.txt", "ensayo upload payload")
        .test("upload file", move |ctx| {
            let seen = Arc::clone(&seen);
            async move {
                let file = ctx.artifact("upload-payload.txt")?;
                *seen.lock().unwrap() = Some(file.clone());
                let page = ctx.new_page().await?;
                page.goto(&the_internet::url("/upload")).await?;
                page.set_input_files("#file-upload", [file]).await?;
                page.click("#file-submit").await?;
                expect(page.locator("h3")?)
                    .to_have_text("File Uploaded!")
                    .await?;
                expect(page.locator("#uploaded-files")?)
                    .to_have_text("upload-payload.txt")
                    .await
            }
        })
        .after_all(move |ctx| async move {
            finalizer.fetch_add(1, Ordering::SeqCst);
            assert!(ctx.artifacts().path("upload-payload.txt").is_some());
            Ok(())
        });
    let report = run(suite).await;

    assert_all_passed(&report);
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
    let path = uploaded.lock().unwrap().clone().unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn test_upload_without_file_reports_server_error() {
    let (_session, page) = open("/upload").await;
    page.click("#file-submit").await.unwrap();
    expect(page.locator("h3").unwrap())
        .to_have_text("Internal Server Error")
        .await
        .unwrap();
}

// ============================================================================
// Scenario D: data-driven login
// ============================================================================

const LOGIN_ROWS: &str = r#"
- username: invalid1
  password: pass1
  expected: Your username is invalid!
- username: invalid2
  password: pass2
  expected: Your username is invalid!
- username: tomsmith
  password: SuperSecretPassword!
  expected: You logged into a secure area!
"#;

fn login_suite(table: ParamTable) -> TestSuite {
    TestSuite::new("login").parameterized("login as {username}", table, |ctx| async move {
        let page = ctx.new_page().await?;
        page.goto(&the_internet::url("/login")).await?;
        page.fill("#username", ctx.param("username")?).await?;
        page.fill("#password", ctx.param("password")?).await?;
        page.click("button[type=\"submit\"]").await?;
        expect(page.locator("#flash")?)
            .to_contain_text(ctx.param("expected")?)
            .await
    })
}

#[tokio::test]
async fn test_three_login_rows_report_independently() {
    let table = ParamTable::from_yaml(LOGIN_ROWS).unwrap();
    let report = run(login_suite(table)).await;

    assert_all_passed(&report);
    assert_eq!(report.total_count(), 3);
    for (name, expected) in [
        ("login as invalid1", "Your username is invalid!"),
        ("login as invalid2", "Your username is invalid!"),
        ("login as tomsmith", "You logged into a secure area!"),
    ] {
        let entry = report.result(name).expect(name);
        assert_eq!(entry.status, TestStatus::Passed);
        let row = entry.row.as_ref().unwrap();
        assert_eq!(row.get("expected"), Some(expected));
    }
}

#[tokio::test]
async fn test_row_order_and_parallelism_do_not_change_outcomes() {
    let mut rows = ParamTable::from_yaml(LOGIN_ROWS).unwrap().rows().to_vec();
    rows.reverse();
    let report = run_with(
        support::config().with_workers(3),
        login_suite(ParamTable::from(rows)),
    )
    .await;

    assert_all_passed(&report);
    let names: Vec<&str> = report.results().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["login as tomsmith", "login as invalid2", "login as invalid1"]
    );
}

#[tokio::test]
async fn test_wrong_expectation_fails_only_its_row() {
    let table = ParamTable::from_yaml(
        r#"
- username: tomsmith
  password: wrong
  expected: You logged into a secure area!
- username: tomsmith
  password: SuperSecretPassword!
  expected: You logged into a secure area!
"#,
    )
    .unwrap();
    let suite = TestSuite::new("login").parameterized("login {password}", table, |ctx| async move {
        let page = ctx.new_page().await?;
        page.goto(&the_internet::url("/login")).await?;
        page.fill("#username", ctx.param("username")?).await?;
        page.fill("#password", ctx.param("password")?).await?;
        page.click("button[type=\"submit\"]").await?;
        expect(page.locator("#flash")?.with_timeout(300))
            .to_contain_text(ctx.param("expected")?)
            .await
    });
    let report = run(suite).await;

    assert_eq!(report.passed_count(), 1);
    assert_eq!(report.failed_count(), 1);
    let failed = report.result("login wrong").unwrap();
    let error = failed.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::AssertionFailure);
    assert!(error.message.contains("Your password is invalid!"));
    let diagnostics = failed.diagnostics.as_ref().unwrap();
    assert!(diagnostics.pages[0].url.ends_with("/login"));
}

// ============================================================================
// Failure properties
// ============================================================================

#[tokio::test]
async fn test_missing_element_times_out_near_the_deadline() {
    let suite = TestSuite::new("missing").test("never there", |ctx| async move {
        let page = ctx.new_page().await?;
        page.goto(&the_internet::url("/login")).await?;
        page.locator("#does-not-exist")?.with_timeout(300).click().await
    });
    let started = Instant::now();
    let report = run(suite).await;
    let elapsed = started.elapsed();

    let entry = report.result("never there").unwrap();
    assert_eq!(entry.status, TestStatus::Failed);
    let error = entry.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::ElementNotFound);
    assert!(error.message.contains("#does-not-exist"));
    assert!(error.message.contains("300ms"));
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn test_closed_channel_fails_only_its_case() {
    let suite = TestSuite::new("disconnect")
        .test("disconnects", |ctx| async move {
            let page = ctx.new_page().await?;
            page.goto(&the_internet::url("/login")).await?;
            ctx.session().channel().close().await?;
            page.title().await.map(|_| ())
        })
        .test("survives", |ctx| async move {
            let page = ctx.new_page().await?;
            page.goto(&the_internet::url("/login")).await?;
            expect(page.locator("h2")?).to_have_text("Login Page").await
        });
    let report = run(suite).await;

    let disconnected = report.result("disconnects").unwrap();
    assert_eq!(disconnected.error.as_ref().unwrap().kind, ErrorKind::ChannelClosed);
    assert_eq!(
        report.result("survives").unwrap().status,
        TestStatus::Passed
    );
}

#[tokio::test]
async fn test_every_nested_frame_is_reachable() {
    let (_session, page) = open("/nested_frames").await;
    let top = page.frame_locator("frame[name=\"frame-top\"]").unwrap();
    for (name, text) in [
        ("frame-left", "LEFT"),
        ("frame-middle", "MIDDLE"),
        ("frame-right", "RIGHT"),
    ] {
        let frame = top
            .frame_locator(&format!("frame[name=\"{name}\"]"))
            .unwrap();
        expect(frame.locator("body").unwrap())
            .to_have_text(text)
            .await
            .unwrap();
    }
    let bottom = page.frame_locator("frame[name=\"frame-bottom\"]").unwrap();
    expect(bottom.locator("body").unwrap())
        .to_have_text("BOTTOM")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_frame_handles_follow_a_reload() {
    let (session, page) = open("/nested_frames").await;
    let middle = page
        .frame_locator("frame[name=\"frame-top\"]")
        .unwrap()
        .frame_locator("frame[name=\"frame-middle\"]")
        .unwrap();
    let content = middle.locator("#content").unwrap();
    let stale = content.element_handle().await.unwrap();

    page.goto(&the_internet::url("/nested_frames")).await.unwrap();
    assert!(matches!(
        stale.refresh().await.unwrap_err(),
        EnsayoError::StaleContext { .. } | EnsayoError::StaleElement { .. }
    ));
    assert_eq!(content.text_content().await.unwrap(), "MIDDLE");
    assert_eq!(session.pages().len(), 1);
}
