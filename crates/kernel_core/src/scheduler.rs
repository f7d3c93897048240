use hal::Platform;

use crate::fs::Filesystem;
use crate::kernel::{Kernel, Transfer, ROOT_PROGRAM};
use crate::process::{Frame, Pid, ProcState};

impl<F: Filesystem, H: Platform> Kernel<F, H> {
    /// Runs one round-robin step over the terminals.
    ///
    /// `frame` is the interrupted kernel context. Only the top of each
    /// terminal's chain is ever dispatched; a terminal without a running
    /// process gets its root shell.
    pub fn tick(&mut self, frame: Frame) -> Transfer {
        let Some(pid) = self.terminals.current().running else {
            return self.launch_root(frame, None);
        };
        if let Some(pcb) = self.processes.by_pid_mut(pid) {
            pcb.saved = frame;
            pcb.state = ProcState::Suspended;
        }

        let previous = self.terminals.active();
        let next = self.terminals.advance();
        self.show(next);
        log::trace!("sched: terminal {} -> {}", previous, next);

        match self.terminals.current().running {
            Some(next_pid) => self.resume(next_pid),
            None => self.launch_root(frame, Some((previous, pid))),
        }
    }

    /// Points the kernel video window at the page `terminal` draws into.
    fn show(&mut self, terminal: usize) {
        self.install_kernel_video(terminal);
        if terminal == self.terminals.visible() {
            if let Some(slot) = self.terminals.get(terminal) {
                self.hw.set_cursor(slot.cursor);
            }
        }
        self.space.flush(&self.hw);
    }

    fn launch_root(&mut self, frame: Frame, previous: Option<(usize, Pid)>) -> Transfer {
        let terminal = self.terminals.active();
        let slot = self.terminals.current_mut();
        if slot.started {
            log::warn!("sched: terminal {} has no shell, relaunching", terminal);
        } else {
            slot.entry = Some(frame);
        }
        match self.execute(ROOT_PROGRAM, frame) {
            Ok(entry) => Transfer::EnterUser(entry),
            Err(err) => {
                log::error!("sched: cannot start shell on terminal {}: {:?}", terminal, err);
                match previous {
                    Some((previous, pid)) => {
                        self.terminals.set_active(previous);
                        self.show(previous);
                        self.resume(pid)
                    }
                    None => Transfer::Return(0),
                }
            }
        }
    }

    fn resume(&mut self, pid: Pid) -> Transfer {
        let terminal = self.terminals.active();
        let Some(pcb) = self.processes.by_pid_mut(pid) else {
            log::error!("sched: terminal {} names dead pid {}", terminal, pid);
            return Transfer::Return(0);
        };
        pcb.state = ProcState::Running;
        let (frame, kernel_stack, video_mapped) = (pcb.saved, pcb.kernel_stack, pcb.video_mapped);

        self.hw.set_kernel_stack(kernel_stack);
        self.space.map_program(pid);
        self.install_user_video(video_mapped, terminal);
        self.space.flush(&self.hw);
        Transfer::Resume { frame, value: 0 }
    }
}

#[cfg(test)]
mod tests {
    use crate::bootfs::BootFs;
    use crate::kernel::{Kernel, Transfer};
    use crate::layout::{
        kernel_stack_top, program_frame, terminal_page, USER_BASE, USER_VIDEO, VIDEO_MEMORY,
    };
    use crate::process::{Frame, ProcState};
    use crate::testing::{sample_image, MockPlatform};

    fn boot(image: &[u8]) -> Box<Kernel<BootFs<'_>, MockPlatform>> {
        let fs = BootFs::parse(image).expect("image should parse");
        let mut kernel = Box::new(Kernel::new(fs, MockPlatform::new()));
        kernel.init();
        kernel
    }

    fn frame(n: u32) -> Frame {
        Frame {
            esp: 0x7F_0000 + n * 0x100,
            ebp: 0x7F_0080 + n * 0x100,
        }
    }

    fn entered(transfer: Transfer) -> u32 {
        match transfer {
            Transfer::EnterUser(entry) => entry.pid,
            other => panic!("expected a user entry, got {:?}", other),
        }
    }

    #[test]
    fn first_tick_starts_terminal_zero() {
        let image = sample_image();
        let mut kernel = boot(&image);
        assert_eq!(entered(kernel.tick(frame(0))), 0);
        let terminal = kernel.terminals().current();
        assert_eq!(terminal.running, Some(0));
        assert_eq!(terminal.entry, Some(frame(0)));
        assert!(terminal.started);
    }

    #[test]
    fn ticks_start_every_terminal_then_rotate() {
        let image = sample_image();
        let mut kernel = boot(&image);
        assert_eq!(entered(kernel.tick(frame(0))), 0);
        assert_eq!(entered(kernel.tick(frame(1))), 1);
        assert_eq!(kernel.terminals().active(), 1);
        assert_eq!(entered(kernel.tick(frame(2))), 2);
        assert_eq!(kernel.terminals().active(), 2);

        assert_eq!(
            kernel.tick(frame(3)),
            Transfer::Resume {
                frame: frame(1),
                value: 0
            }
        );
        assert_eq!(kernel.terminals().active(), 0);
        assert_eq!(kernel.hw().kernel_stack, kernel_stack_top(0));
        assert_eq!(
            kernel.space().translate(USER_BASE).map(|(pa, _)| pa),
            Some(program_frame(0))
        );
        assert_eq!(
            kernel.processes().by_pid(2).map(|pcb| pcb.saved),
            Some(frame(3))
        );
        assert_eq!(
            kernel.processes().by_pid(2).map(|pcb| pcb.state),
            Some(ProcState::Suspended)
        );
    }

    #[test]
    fn tick_remaps_video_for_background_terminal() {
        let image = sample_image();
        let mut kernel = boot(&image);
        kernel.tick(frame(0));
        kernel.tick(frame(1));
        assert_eq!(
            kernel.space().translate(VIDEO_MEMORY).map(|(pa, _)| pa),
            Some(terminal_page(1))
        );
        kernel.tick(frame(2));
        kernel.tick(frame(3));
        assert_eq!(
            kernel.space().translate(VIDEO_MEMORY).map(|(pa, _)| pa),
            Some(VIDEO_MEMORY)
        );
    }

    #[test]
    fn resumed_process_gets_its_video_window() {
        let image = sample_image();
        let mut kernel = boot(&image);
        kernel.tick(frame(0));
        kernel
            .map_video(USER_BASE + 0x48000)
            .expect("destination in program page");
        kernel.tick(frame(1));
        assert!(kernel.space().translate(USER_VIDEO).is_none());
        kernel.tick(frame(2));
        kernel.tick(frame(3));
        assert_eq!(
            kernel.space().translate(USER_VIDEO).map(|(pa, _)| pa),
            Some(VIDEO_MEMORY)
        );
    }

    #[test]
    fn only_top_of_chain_is_dispatched() {
        let image = sample_image();
        let mut kernel = boot(&image);
        kernel.tick(frame(0));
        let child = kernel.execute(b"counter", frame(9)).expect("counter starts");
        kernel.tick(frame(1));
        kernel.tick(frame(2));
        let transfer = kernel.tick(frame(3));
        assert_eq!(
            transfer,
            Transfer::Resume {
                frame: frame(1),
                value: 0
            }
        );
        assert_eq!(kernel.current_pid(), Some(child.pid));
        assert_eq!(
            kernel.processes().by_pid(0).map(|pcb| pcb.saved),
            Some(frame(9))
        );
    }

    #[test]
    fn failed_launch_keeps_previous_terminal() {
        let image = sample_image();
        let mut kernel = boot(&image);
        kernel.tick(frame(0));
        for n in 1..6 {
            kernel.execute(b"counter", frame(n)).expect("slot available");
        }
        let transfer = kernel.tick(frame(7));
        assert_eq!(
            transfer,
            Transfer::Resume {
                frame: frame(7),
                value: 0
            }
        );
        assert_eq!(kernel.terminals().active(), 0);
        assert!(!kernel.terminals().get(1).is_some_and(|t| t.started));
        assert_eq!(
            kernel.space().translate(VIDEO_MEMORY).map(|(pa, _)| pa),
            Some(VIDEO_MEMORY)
        );
    }
}
