const BANNER: &str = r#"
             _                               _       _         _
 _ __  _   _| |___  ___  __      ____ _| |_ ___| |__   __| | ___   __ _
| '_ \| | | | / __|/ _ \ \ \ /\ / / _` | __/ __| '_ \ / _` |/ _ \ / _` |
| |_) | |_| | \__ \  __/  \ V  V / (_| | || (__| | | | (_| | (_) | (_| |
| .__/ \__,_|_|___/\___|   \_/\_/ \__,_|\__\___|_| |_|\__,_|\___/ \__, |
|_|                                                               |___/
"#;

pub fn print_banner() {
    println!("{}", BANNER);
}

pub fn plural<'a>(count: usize, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 { one } else { many }
}

#[cfg(windows)]
pub fn setup_console() {
    use windows_sys::Win32::System::Console::{
        GetStdHandle, GetConsoleMode, SetConsoleMode, SetConsoleOutputCP,
        STD_OUTPUT_HANDLE, ENABLE_VIRTUAL_TERMINAL_PROCESSING,
    };
    unsafe {
        SetConsoleOutputCP(65001);
        let handle = GetStdHandle(STD_OUTPUT_HANDLE);
        let mut mode = 0;
        if GetConsoleMode(handle, &mut mode) != 0 {
            SetConsoleMode(handle, mode | ENABLE_VIRTUAL_TERMINAL_PROCESSING);
        }
    }
}

#[cfg(not(windows))]
pub fn setup_console() {}
