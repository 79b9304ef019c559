fn main() {
    if let Err(err) = fill_station_controller::app::run_service() {
        eprintln!("service startup failed: {err}");
        std::process::exit(1);
    }
}
