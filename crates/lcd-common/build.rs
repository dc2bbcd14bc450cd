//! ---
//! lcd_section: "01-core-functionality"
//! lcd_subsection: "build"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Build metadata capture for version reporting."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tarball builds have no git metadata; VersionInfo falls back to UNKNOWN.
    EmitBuilder::builder()
        .all_build()
        .all_cargo()
        .all_git()
        .emit()?;

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
