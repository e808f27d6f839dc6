//! # coopos Example Firmware
//!
//! Exercises every trigger source of the cooperative scheduler on a bare
//! STM32F4 (16 MHz HSI), with counters standing in for real peripherals:
//!
//! | Task | Trigger | Period | Behavior |
//! |------|---------|--------|----------|
//! | `heartbeat` | time elapsed | 500 ms | bumps the uptime counter |
//! | `blinker` (FSM) | time elapsed | 250 ms | alternates LED on/off states |
//! | `sensor_drain` | buffer auto-pop | — | consumes samples the tick ISR produces |
//! | `button_handler` | async event | — | reacts to simulated button presses |
//! | `idle` | priority | — | sleeps the core until the next interrupt |
//!
//! The SysTick handler plays the part of the integrator's interrupt layer:
//! it feeds the tick, pushes a fake ADC sample into the sensor buffer
//! every 100 ms, and posts an async "button press" every 2 s.

#![no_std]
#![no_main]

use core::ptr::{addr_of, addr_of_mut};
use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m_rt::{entry, exception};
use panic_halt as _;

use coopos::event::EventInfo;
use coopos::fsm::{StateMachine, Status};
use coopos::ringbuffer::RingBuffer;
use coopos::scheduler::Scheduler;
use coopos::task::{LinkMode, TaskId, PERIODIC};

// ---------------------------------------------------------------------------
// System configuration
// ---------------------------------------------------------------------------

/// Core clock: STM32F4 on the 16 MHz HSI, no PLL.
const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Scheduler tick rate (1 ms epochs).
const TICK_HZ: u32 = 1_000;

// ---------------------------------------------------------------------------
// Scheduler instance and shared storage
// ---------------------------------------------------------------------------

/// The one scheduler instance. Accessed from the main thread (run loop)
/// and from SysTick (tick + event posting); the posting paths go through
/// the crate's critical sections.
static mut SCHEDULER: Scheduler<'static, u32> = Scheduler::new();

/// Backing storage for the sensor sample buffer (16 one-byte samples).
static mut SENSOR_SAMPLES: [u8; 16] = [0; 16];

/// Handles the tick ISR posts events to, filled in during start-up.
static mut SENSOR_TASK: Option<TaskId> = None;
static mut BUTTON_TASK: Option<TaskId> = None;

/// Observable effects of the tasks (inspect via a debugger).
static UPTIME_HALF_SECONDS: AtomicU32 = AtomicU32::new(0);
static LED_STATE: AtomicU32 = AtomicU32::new(0);
static SAMPLES_SEEN: AtomicU32 = AtomicU32::new(0);
static BUTTON_PRESSES: AtomicU32 = AtomicU32::new(0);

fn sched() -> &'static mut Scheduler<'static, u32> {
    unsafe { &mut *addr_of_mut!(SCHEDULER) }
}

// ---------------------------------------------------------------------------
// Task callbacks
// ---------------------------------------------------------------------------

/// Periodic liveness marker.
fn heartbeat(_: &mut EventInfo<'_, '_, u32>) {
    UPTIME_HALF_SECONDS.fetch_add(1, Ordering::Relaxed);
}

/// Consumes one auto-popped sensor sample per firing.
fn sensor_drain(ev: &mut EventInfo<'_, '_, u32>) {
    if let Some(sample) = ev.event_data.element() {
        let _ = sample[0];
        SAMPLES_SEEN.fetch_add(1, Ordering::Relaxed);
    }
}

/// Reacts to the simulated button; the payload carries the press count.
fn button_handler(ev: &mut EventInfo<'_, '_, u32>) {
    if let Some(count) = ev.event_data.payload() {
        BUTTON_PRESSES.store(count, Ordering::Relaxed);
    }
}

/// Idle hook: nothing pending anywhere, sleep until the next interrupt.
fn idle(_: &mut EventInfo<'_, '_, u32>) {
    cortex_m::asm::wfi();
}

// ---------------------------------------------------------------------------
// Blinker state machine
// ---------------------------------------------------------------------------

fn led_on(sm: &mut StateMachine<u32>, _: &mut EventInfo<'_, '_, u32>) -> Status {
    LED_STATE.store(1, Ordering::Relaxed);
    sm.set_next_state(Some(led_off));
    Status::Success
}

fn led_off(sm: &mut StateMachine<u32>, _: &mut EventInfo<'_, '_, u32>) -> Status {
    LED_STATE.store(0, Ordering::Relaxed);
    sm.set_next_state(Some(led_on));
    Status::Success
}

// ---------------------------------------------------------------------------
// Interrupt layer
// ---------------------------------------------------------------------------

/// Tick ISR: one epoch per millisecond, plus the simulated producers.
#[exception]
fn SysTick() {
    let s = sched();
    s.sys_tick();
    let now = s.clock().now();

    // A fake ADC sample every 100 ms.
    if now % 100 == 0 {
        if let Some(id) = unsafe { *addr_of!(SENSOR_TASK) } {
            if let Some(buffer) = s.buffer_mut(id) {
                let _ = buffer.push(&[(now / 100) as u8]);
            }
        }
    }

    // A fake button press every 2 s.
    if now % 2_000 == 0 && now != 0 {
        if let Some(id) = unsafe { *addr_of!(BUTTON_TASK) } {
            s.send_async(id, now / 2_000);
        }
    }
}

fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    syst.set_reload(SYSTEM_CLOCK_HZ / TICK_HZ - 1);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[entry]
fn main() -> ! {
    let mut cp = cortex_m::Peripherals::take().unwrap();

    let s = sched();
    s.init(1.0 / TICK_HZ as f32);
    s.set_idle_callback(Some(idle));

    s.add_task(heartbeat, 10, 0.500, PERIODIC, true, None)
        .unwrap();

    s.add_fsm_task(StateMachine::new(led_on), 20, 0.250, true, None)
        .unwrap();

    let sensor = s.add_event_task(sensor_drain, 30, None).unwrap();
    let storage = unsafe { &mut *addr_of_mut!(SENSOR_SAMPLES) };
    s.link_buffer(sensor, RingBuffer::new(storage, 1, 16), LinkMode::AutoPop);
    unsafe { SENSOR_TASK = Some(sensor) };

    let button = s.add_event_task(button_handler, 40, None).unwrap();
    unsafe { BUTTON_TASK = Some(button) };

    configure_systick(&mut cp.SYST);

    s.run();

    // Only reachable after a release request.
    loop {
        cortex_m::asm::wfi();
    }
}
