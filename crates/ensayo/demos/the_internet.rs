//! The-Internet Demo - Four End-to-End Flows
//!
//! Runs the classic practice-site flows through the test runner: enabling a
//! dynamic control, answering a JavaScript alert, following a new window,
//! and a data-driven login table.
//!
//! # Running
//!
//! ```bash
//! # Against the in-memory simulated site
//! cargo run --example the_internet -p ensayo
//!
//! # Against the live site with Chromium
//! cargo run --example the_internet -p ensayo --features browser -- --chromium
//! ```
//!
//! Settings come from `ensayo.yaml` when present, then `ENSAYO_*`
//! environment variables. The JSON report is written to `ensayo-report.json`.

#![allow(clippy::uninlined_format_args, clippy::unwrap_used)]

use ensayo::logging::{self, LogFormat};
use ensayo::simulated::{the_internet, SimulatedLauncher};
use ensayo::{expect, BrowserLauncher, ParamTable, RunnerConfig, TestRunner, TestSuite};
use std::path::Path;
use std::sync::Arc;

const LOGINS: &str = r#"
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

fn suite() -> ensayo::EnsayoResult<TestSuite> {
    let logins = ParamTable::from_yaml(LOGINS)?;
    Ok(TestSuite::new("the-internet")
        .test("enable control", |ctx| async move {
            let page = ctx.new_page().await?;
            page.goto(&the_internet::url("/dynamic_controls")).await?;
            page.click("#input-example button:has-text(\"Enable\")").await?;
            expect(page.locator("#input-example input[type=\"text\"]")?)
                .to_be_enabled()
                .await
        })
        .test("javascript alert", |ctx| async move {
            let page = ctx.new_page().await?;
            page.goto(&the_internet::url("/javascript_alerts")).await?;
            let pending = page.once_dialog(|dialog| dialog.accept());
            page.click("button[onclick=\"jsAlert()\"]").await?;
            let dialog = pending.await?;
            println!("  alert said: {}", dialog.message());
            expect(page.locator("#result")?)
                .to_have_text("You successfully clicked an alert")
                .await
        })
        .test("new window", |ctx| async move {
            let page = ctx.new_page().await?;
            page.goto(&the_internet::url("/windows")).await?;
            let link = page.locator("text=Click Here")?;
            let popup = page.wait_for_popup(|| link.click()).await?;
            expect(popup.locator("h3")?).to_have_text("New Window").await
        })
        .parameterized("login as {username}", logins, |ctx| async move {
            let page = ctx.new_page().await?;
            page.goto(&the_internet::url("/login")).await?;
            page.fill("#username", ctx.param("username")?).await?;
            page.fill("#password", ctx.param("password")?).await?;
            page.click("button[type=\"submit\"]").await?;
            expect(page.locator("#flash")?)
                .to_contain_text(ctx.param("expected")?)
                .await
        }))
}

fn config() -> ensayo::EnsayoResult<RunnerConfig> {
    let path = Path::new("ensayo.yaml");
    let base = if path.exists() {
        RunnerConfig::from_file(path)?
    } else {
        RunnerConfig::default()
    };
    base.with_env()?.validated()
}

#[cfg(feature = "browser")]
fn launcher(config: &RunnerConfig, chromium: bool) -> Arc<dyn BrowserLauncher> {
    if chromium {
        return Arc::new(ensayo::cdp::CdpLauncher::new(config.browser.clone()));
    }
    Arc::new(SimulatedLauncher::new(the_internet::site()))
}

#[cfg(not(feature = "browser"))]
fn launcher(_config: &RunnerConfig, chromium: bool) -> Arc<dyn BrowserLauncher> {
    if chromium {
        eprintln!("--chromium needs the `browser` feature; using the simulated site");
    }
    Arc::new(SimulatedLauncher::new(the_internet::site()))
}

#[tokio::main]
async fn main() -> ensayo::EnsayoResult<()> {
    logging::init(LogFormat::Pretty);
    println!("=== Ensayo: the-internet ===\n");

    let chromium = std::env::args().any(|a| a == "--chromium");
    let config = config()?;
    let runner = TestRunner::new(config.clone(), launcher(&config, chromium));

    let report = runner.run(suite()?).await;
    println!("\n{}", report.summary());
    report.write_json(Path::new("ensayo-report.json"))?;
    println!("report written to ensayo-report.json");

    if !report.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}
