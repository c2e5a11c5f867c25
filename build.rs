use std::fs;
use std::path::Path;

// Every `src/rules/<name>/mod.rs` becomes a rule module; rules register themselves via inventory.
fn main() {
    println!("cargo:rerun-if-changed=src/rules/");

    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR is set");
    let rules_dir = Path::new(&manifest_dir).join("src/rules");

    let mut modules: Vec<String> = fs::read_dir(&rules_dir)
        .expect("src/rules/ directory not found")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().join("mod.rs").is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    modules.sort();

    let content: String = modules
        .iter()
        .map(|name| {
            let rule_path = rules_dir.join(name).join("mod.rs");
            format!("#[path = {:?}]\npub(crate) mod {};\n", rule_path, name)
        })
        .collect();

    let out_dir = std::env::var("OUT_DIR").expect("OUT_DIR is set");
    let dest = Path::new(&out_dir).join("rule_modules.rs");
    fs::write(dest, content).expect("write rule_modules.rs");
}
