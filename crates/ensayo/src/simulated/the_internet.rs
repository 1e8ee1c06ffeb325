//! A simulated copy of the public "the-internet" practice site.
//!
//! Only the pages and behaviors end-to-end suites commonly drive are
//! modelled: login, JavaScript dialogs, dynamic controls and loading, file
//! upload, nested frames, and new windows. Timings are short but non-zero so
//! auto-waiting is actually exercised.

use super::site::{Node, PageSpec, Site};
use crate::dialog::DialogType;

/// Origin of the practice site
pub const BASE_URL: &str = "https://the-internet.herokuapp.com";

/// Origin of the example.com page
pub const EXAMPLE_URL: &str = "https://example.com";

/// Valid login
pub const USERNAME: &str = "tomsmith";

/// Valid password
pub const PASSWORD: &str = "SuperSecretPassword!";

/// Full URL of a path on the practice site
#[must_use]
pub fn url(path: &str) -> String {
    format!("{BASE_URL}{path}")
}

/// The site, ready to serve
#[must_use]
pub fn site() -> Site {
    Site::new()
        .page(&url("/login"), login())
        .page(&url("/secure"), secure())
        .page(&url("/javascript_alerts"), javascript_alerts())
        .page(&url("/dynamic_controls"), dynamic_controls())
        .page(&url("/dynamic_loading/1"), dynamic_loading())
        .page(&url("/upload"), upload())
        .page(&url("/nested_frames"), nested_frames())
        .page(&url("/frame_top"), frame_top())
        .page(&url("/frame_left"), frame_leaf("LEFT"))
        .page(&url("/frame_middle"), frame_leaf("MIDDLE"))
        .page(&url("/frame_right"), frame_leaf("RIGHT"))
        .page(&url("/frame_bottom"), frame_leaf("BOTTOM").load_delay_ms(40))
        .page(&url("/windows"), windows())
        .page(&url("/windows/new"), new_window())
        .page(EXAMPLE_URL, example_domain())
}

fn example() -> Node {
    Node::new("div").class("example")
}

fn login() -> PageSpec {
    let form = Node::new("form").id("login").children([
        Node::new("label").attr("for", "username").text("Username"),
        Node::new("input")
            .id("username")
            .attr("type", "text")
            .attr("name", "username"),
        Node::new("label").attr("for", "password").text("Password"),
        Node::new("input")
            .id("password")
            .attr("type", "password")
            .attr("name", "password"),
        Node::new("button")
            .class("radius")
            .attr("type", "submit")
            .text(" Login"),
    ]);
    PageSpec::new(
        "The Internet",
        Node::new("body").children([
            Node::new("div").id("flash-messages"),
            example().children([Node::new("h2").text("Login Page"), form]),
        ]),
    )
    .on_click("button[type=\"submit\"]", |doc, fx| {
        let username = doc.value_of("#username").unwrap_or_default();
        let password = doc.value_of("#password").unwrap_or_default();
        fx.after(30);
        if username == USERNAME && password == PASSWORD {
            fx.navigate("/secure");
        } else {
            let message = if username == USERNAME {
                "Your password is invalid!"
            } else {
                "Your username is invalid!"
            };
            fx.remove("#flash").append(
                "#flash-messages",
                Node::new("div")
                    .id("flash")
                    .class("flash error")
                    .text(&format!("\n            {message}\n            ×\n")),
            );
        }
    })
}

fn secure() -> PageSpec {
    PageSpec::new(
        "The Internet",
        Node::new("body").children([
            Node::new("div").id("flash-messages").child(
                Node::new("div")
                    .id("flash")
                    .class("flash success")
                    .text("\n            You logged into a secure area!\n            ×\n"),
            ),
            example().children([
                Node::new("h2").text(" Secure Area"),
                Node::new("a")
                    .class("button secondary radius")
                    .attr("href", "/login")
                    .text("Logout"),
            ]),
        ]),
    )
}

fn javascript_alerts() -> PageSpec {
    let button = |call: &str, label: &str| {
        Node::new("li").child(
            Node::new("button")
                .attr("onclick", call)
                .text(label),
        )
    };
    PageSpec::new(
        "The Internet",
        Node::new("body").child(example().children([
            Node::new("h3").text("JavaScript Alerts"),
            Node::new("ul").children([
                button("jsAlert()", "Click for JS Alert"),
                button("jsConfirm()", "Click for JS Confirm"),
                button("jsPrompt()", "Click for JS Prompt"),
            ]),
            Node::new("h4").text("Result:"),
            Node::new("p").id("result"),
        ])),
    )
    .on_click("button[onclick=\"jsAlert()\"]", |_, fx| {
        fx.dialog(DialogType::Alert, "I am a JS Alert", None, |_, fx| {
            fx.set_text("#result", "You successfully clicked an alert");
        });
    })
    .on_click("button[onclick=\"jsConfirm()\"]", |_, fx| {
        fx.dialog(DialogType::Confirm, "I am a JS Confirm", None, |answer, fx| {
            let choice = if answer.accepted { "Ok" } else { "Cancel" };
            fx.set_text("#result", &format!("You clicked: {choice}"));
        });
    })
    .on_click("button[onclick=\"jsPrompt()\"]", |_, fx| {
        fx.dialog(DialogType::Prompt, "I am a JS prompt", Some(""), |answer, fx| {
            let entered = answer.text.as_deref().unwrap_or("null");
            fx.set_text("#result", &format!("You entered: {entered}"));
        });
    })
}

fn dynamic_controls() -> PageSpec {
    PageSpec::new(
        "The Internet",
        Node::new("body").child(example().children([
            Node::new("h4").text("Dynamic Controls"),
            Node::new("form").id("checkbox-example").children([
                Node::new("div").id("checkbox").child(
                    Node::new("input")
                        .attr("type", "checkbox")
                        .attr("label", "blah")
                        .text(" A checkbox"),
                ),
                Node::new("button")
                    .attr("type", "button")
                    .attr("onclick", "swapCheckbox()")
                    .text("Remove"),
            ]),
            Node::new("form").id("input-example").children([
                Node::new("input")
                    .attr("type", "text")
                    .attr("disabled", ""),
                Node::new("button")
                    .attr("type", "button")
                    .attr("onclick", "swapInput()")
                    .text("Enable"),
            ]),
        ])),
    )
    .on_click("#input-example button:has-text(\"Enable\")", |_, fx| {
        fx.set_attr("#input-example button", "disabled", "")
            .after(120)
            .remove_attr("#input-example input[type=\"text\"]", "disabled")
            .remove_attr("#input-example button", "disabled")
            .set_text("#input-example button", "Disable")
            .remove("#input-example #message")
            .append(
                "#input-example",
                Node::new("p").id("message").text("It's enabled!"),
            );
    })
    .on_click("#input-example button:has-text(\"Disable\")", |_, fx| {
        fx.after(120)
            .set_attr("#input-example input[type=\"text\"]", "disabled", "")
            .set_text("#input-example button", "Enable")
            .remove("#input-example #message")
            .append(
                "#input-example",
                Node::new("p").id("message").text("It's disabled!"),
            );
    })
    .on_click("#checkbox-example button:has-text(\"Remove\")", |_, fx| {
        fx.after(120)
            .remove("#checkbox")
            .set_text("#checkbox-example button", "Add")
            .append(
                "#checkbox-example",
                Node::new("p").id("message").text("It's gone!"),
            );
    })
}

fn dynamic_loading() -> PageSpec {
    PageSpec::new(
        "The Internet",
        Node::new("body").child(example().children([
            Node::new("h3").text("Dynamically Loaded Page Elements"),
            Node::new("h4").text("Example 1: Element on page that is hidden"),
            Node::new("div")
                .id("start")
                .child(Node::new("button").text("Start")),
            Node::new("div")
                .id("finish")
                .hidden()
                .child(Node::new("h4").text("Hello World!")),
            Node::new("div").id("loading").hidden().text("Loading... "),
        ])),
    )
    .on_click("#start button", |_, fx| {
        fx.hide("#start")
            .show("#loading")
            .after(250)
            .hide("#loading")
            .show("#finish");
    })
}

fn upload() -> PageSpec {
    PageSpec::new(
        "The Internet",
        Node::new("body").child(example().children([
            Node::new("h3").text("File Uploader"),
            Node::new("form")
                .attr("action", "/upload")
                .attr("method", "POST")
                .children([
                    Node::new("input")
                        .id("file-upload")
                        .attr("type", "file")
                        .attr("name", "file"),
                    Node::new("input")
                        .id("file-submit")
                        .class("button")
                        .attr("type", "submit")
                        .attr("value", "Upload"),
                ]),
        ])),
    )
    .on_click("#file-submit", |doc, fx| {
        let Some(file) = doc.value_of("#file-upload").filter(|v| !v.is_empty()) else {
            fx.set_text(".example h3", "Internal Server Error");
            return;
        };
        fx.after(40)
            .set_text(".example h3", "File Uploaded!")
            .remove(".example form")
            .append(
                ".example",
                Node::new("div")
                    .id("uploaded-files")
                    .class("panel text-center")
                    .text(&file),
            );
    })
}

fn frame(name: &str, src: &str) -> Node {
    Node::new("frame").attr("name", name).attr("src", src)
}

fn nested_frames() -> PageSpec {
    PageSpec::new(
        "Frames",
        Node::new("frameset")
            .attr("rows", "50%,50%")
            .children([
                frame("frame-top", "/frame_top"),
                frame("frame-bottom", "/frame_bottom"),
            ]),
    )
}

fn frame_top() -> PageSpec {
    PageSpec::new(
        "",
        Node::new("frameset")
            .attr("cols", "33%,33%,33%")
            .attr("name", "frameset-middle")
            .children([
                frame("frame-left", "/frame_left"),
                frame("frame-middle", "/frame_middle"),
                frame("frame-right", "/frame_right"),
            ]),
    )
    .load_delay_ms(20)
}

fn frame_leaf(text: &str) -> PageSpec {
    let body = if text == "MIDDLE" {
        Node::new("body").child(Node::new("div").id("content").text(text))
    } else {
        Node::new("body").text(&format!("\n    {text}\n\n\n"))
    };
    PageSpec::new("", body)
}

fn windows() -> PageSpec {
    PageSpec::new(
        "The Internet",
        Node::new("body").child(example().children([
            Node::new("h3").text("Opening a new window"),
            Node::new("a")
                .attr("href", "/windows/new")
                .attr("target", "_blank")
                .text("Click Here"),
        ])),
    )
}

fn new_window() -> PageSpec {
    PageSpec::new(
        "New Window",
        Node::new("body").child(
            Node::new("div")
                .class("example")
                .child(Node::new("h3").text("New Window")),
        ),
    )
    .load_delay_ms(40)
}

fn example_domain() -> PageSpec {
    PageSpec::new(
        "Example Domain",
        Node::new("body").child(Node::new("div").children([
            Node::new("h1").text("Example Domain"),
            Node::new("p").text(
                "This domain is for use in illustrative examples in documents.",
            ),
            Node::new("p").child(
                Node::new("a")
                    .attr("href", "https://www.iana.org/domains/example")
                    .text("More information..."),
            ),
        ])),
    )
    .load_delay_ms(15)
}
