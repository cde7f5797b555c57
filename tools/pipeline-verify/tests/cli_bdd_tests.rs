use std::process::{Command, Output};

use cucumber::{given, then, when, World};

#[derive(Debug, World)]
#[world(init = Self::new)]
struct CliWorld {
    fixture: Option<String>,
    output: Option<Output>,
}

impl CliWorld {
    fn new() -> Self {
        Self {
            fixture: None,
            output: None,
        }
    }

    fn output(&self) -> &Output {
        self.output.as_ref().expect("no command has been run")
    }

    fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.output().stdout).expect("stdout is not JSON")
    }
}

#[given("the exported pipeline fixture")]
async fn given_fixture(world: &mut CliWorld) {
    world.fixture = Some(format!(
        "{}/tests/fixtures/pipeline.json",
        env!("CARGO_MANIFEST_DIR")
    ));
}

#[when(expr = "I run {string}")]
async fn when_run(world: &mut CliWorld, args: String) {
    let fixture = world.fixture.clone().expect("fixture not set");
    let output = Command::new(env!("CARGO_BIN_EXE_pipeline-verify"))
        .arg("--fixture")
        .arg(fixture)
        .args(args.split_whitespace())
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run pipeline-verify");
    world.output = Some(output);
}

#[then("the command succeeds")]
async fn then_succeeds(world: &mut CliWorld) {
    let output = world.output();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[then("the command fails")]
async fn then_fails(world: &mut CliWorld) {
    assert!(!world.output().status.success());
}

#[then(expr = "the output field {string} is {int}")]
async fn then_field_is_int(world: &mut CliWorld, field: String, expected: i64) {
    assert_eq!(world.json()[field.as_str()], expected);
}

#[then(expr = "the output flag {string} is {word}")]
async fn then_field_is_bool(world: &mut CliWorld, field: String, expected: String) {
    let expected: bool = expected.parse().expect("expected true or false");
    assert_eq!(world.json()[field.as_str()], expected);
}

#[tokio::main]
async fn main() {
    CliWorld::cucumber().run_and_exit("tests/features").await;
}
