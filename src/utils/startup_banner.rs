pub fn print_startup_banner() {
    const RESET: &str = "\x1b[0m";
    const BANNER_COLOR: &str = "\x1b[38;5;31m";
    const DIM_GRAY: &str = "\x1b[2;90m";
    const BANNER: &str = r#"
 _  __    _    ____     __  __  ___
| |/ /   / \  / ___|   |  \/  |/ _ \
| ' /   / _ \ \___ \   | |\/| | | | |
| . \  / ___ \ ___) |  | |  | | |_| |
|_|\_\/_/   \_\____/   |_|  |_|\__\_\
"#;
    const APP_DESCRIPTION: &str =
        "Message queueing server: sessions, priority queues and backpressure over TCP.";
    const LIABILITY_NOTICE: &str =
        "MIT License disclaimer: software is provided \"AS IS\", without warranty or liability.";

    println!("{BANNER_COLOR}");
    println!("{BANNER}{RESET}");
    println!(
        "{} v{} | build {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("KASMQ_BUILD_DATE_UTC")
    );
    println!("{APP_DESCRIPTION}");
    println!("{DIM_GRAY}{LIABILITY_NOTICE}{RESET}");
    println!();
    println!("================================================================");
    println!();
}
