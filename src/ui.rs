//! ui.rs — fatal fault display and the fail-stall terminal state.
//!
//! A fatal boot error in a pre-OS environment has exactly one useful
//! response: say what happened, loudly, and then hold still so somebody can
//! read it. No auto-reboot, no secondary boot path — a power-cycle is the
//! only way out of here.

use core::fmt::Write;

use uefi::prelude::*;
use uefi::proto::console::text::Color;

const ONE_SECOND: usize = 1_000_000;

/// Render the fault block and halt forever.
pub fn fail_and_stall(st: &mut SystemTable<Boot>, status: Status, context: &str) -> ! {
    render_failure(st, status, context);
    halt(st)
}

fn render_failure(st: &mut SystemTable<Boot>, status: Status, context: &str) {
    let stdout = st.stdout();

    let _ = stdout.set_color(Color::Red, Color::Black);
    let _ = writeln!(stdout);
    let _ = writeln!(stdout, "──────────────────── BOOT FAULT ────────────────────");
    let _ = writeln!(stdout, "[!] {}: {:?}", context, status);
    let _ = writeln!(stdout, "────────────────────────────────────────────────────");
    let _ = stdout.set_color(Color::White, Color::Black);
    let _ = writeln!(stdout, "Power-cycle the machine to retry.");
}

/// Terminal state: nothing transitions out of this loop.
fn halt(st: &SystemTable<Boot>) -> ! {
    loop {
        st.boot_services().stall(ONE_SECOND);
    }
}
