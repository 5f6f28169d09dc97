//! Skeleton of a new app

use tracing::warn;

use crate::apps::arduino_app::DESCRIPTOR_FILE;
use crate::apps::descriptor::AppDescriptor;
use crate::errors::Result;
use crate::filesys::dir::Dir;

const SKETCH_INO: &str = "void setup() {}\n\nvoid loop() {}\n";
const SKETCH_PROJECT: &str = "profiles:\n\ndefault_profile:\n";
const PYTHON_MAIN: &str = r#"def main():
    print("Hello World!")


if __name__ == "__main__":
    main()
"#;

#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateOptions {
    pub skip_sketch: bool,
    pub skip_python: bool,
}

/// Write `app.yaml`, `README.md` and the requested main files under `base`
pub async fn generate_app(base: &Dir, descriptor: &AppDescriptor, options: GenerateOptions) -> Result<()> {
    base.create().await?;

    if !options.skip_sketch {
        let sketch = base.subdir("sketch");
        sketch.file("sketch.ino").write_atomic(SKETCH_INO.as_bytes()).await?;
        sketch
            .file("sketch.yaml")
            .write_atomic(SKETCH_PROJECT.as_bytes())
            .await?;
    }

    if !options.skip_python {
        base.subdir("python")
            .file("main.py")
            .write_atomic(PYTHON_MAIN.as_bytes())
            .await?;
    }

    if let Err(e) = base
        .file("README.md")
        .write_atomic(readme(descriptor).as_bytes())
        .await
    {
        warn!(app = %descriptor.name, "failed to generate readme: {}", e);
    }

    base.file(DESCRIPTOR_FILE)
        .write_atomic(descriptor.to_yaml()?.as_bytes())
        .await
}

fn readme(descriptor: &AppDescriptor) -> String {
    let mut out = String::from("# ");
    if let Some(icon) = &descriptor.icon {
        out.push_str(icon);
        out.push(' ');
    }
    out.push_str(&descriptor.name);
    out.push_str("\n\n");
    if !descriptor.description.is_empty() {
        out.push_str(&descriptor.description);
        out.push_str("\n\n");
    }
    if !descriptor.ports.is_empty() {
        let ports: Vec<String> = descriptor.ports.iter().map(u16::to_string).collect();
        out.push_str("Available application ports: ");
        out.push_str(&ports.join(", "));
        out.push('\n');
    }
    out
}
