// Build script helper: renders a crate's README.md as its rustdoc front page.
// Include from build.rs with: include!("../build_common.rs");
//
// The including file must import std::env, std::fs and std::path::Path.

/// Copy README.md to `$OUT_DIR/README_GENERATED.md`, rewriting source links
/// (`src/backend/mod.rs`) into module links (`backend/mod`) rustdoc resolves.
fn process_readme_for_rustdoc(crate_dir: &str) {
    println!("cargo:rerun-if-changed=README.md");

    let readme_path = Path::new(crate_dir).join("README.md");
    let content = fs::read_to_string(&readme_path).unwrap_or_default();
    let rustdoc_content = content.replace("](src/", "](").replace(".rs)", ")");

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    let dest_path = Path::new(&out_dir).join("README_GENERATED.md");
    fs::write(dest_path, rustdoc_content).expect("OUT_DIR is writable");
}
