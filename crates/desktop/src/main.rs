//! Huddle Desktop application entry.

mod app;

use eframe::egui;

fn main() -> eframe::Result<()> {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_min_inner_size([800.0, 600.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Huddle",
        options,
        Box::new(|cc| Box::new(app::HuddleApp::new(cc, runtime))),
    )
}
