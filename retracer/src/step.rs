//! Frame stepping for backends that support it.
//!
//! The replay thread owns a [`Stepper`], an external controller owns the matching
//! [`StepController`]. After each presented frame the stepper publishes the frame number and,
//! while stepping, blocks until the controller says how to proceed. Dropping the controller lets
//! the replay run freely.
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StepCommand {
    /// Replay one more frame, then wait again.
    Step,
    /// Replay without waiting until the next `Step`.
    Continue,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum StepMode {
    Step,
    Continue,
    Detached,
}

/// Replay side of a stepping channel.
#[derive(Debug)]
pub struct Stepper {
    frames: Sender<u64>,
    commands: Receiver<StepCommand>,
    mode: StepMode,
}

/// Controller side of a stepping channel.
#[derive(Debug)]
pub struct StepController {
    frames: Receiver<u64>,
    commands: Sender<StepCommand>,
}

/// Creates a connected stepper and controller. The stepper starts out pausing after every frame.
pub fn channel() -> (Stepper, StepController) {
    let (frame_tx, frame_rx) = mpsc::channel();
    let (command_tx, command_rx) = mpsc::channel();
    let stepper = Stepper {
        frames: frame_tx,
        commands: command_rx,
        mode: StepMode::Step,
    };
    let controller = StepController {
        frames: frame_rx,
        commands: command_tx,
    };
    (stepper, controller)
}

impl Stepper {
    /// False once the controller has gone away.
    pub fn is_attached(&self) -> bool {
        self.mode != StepMode::Detached
    }

    /// Called after frame `frame` was presented.
    pub fn frame_completed(&mut self, frame: u64) {
        match self.mode {
            StepMode::Detached => return,
            StepMode::Continue => match self.commands.try_recv() {
                Ok(StepCommand::Step) => self.mode = StepMode::Step,
                Ok(StepCommand::Continue) | Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => return self.detach(),
            },
            StepMode::Step => {}
        }

        if self.frames.send(frame).is_err() {
            return self.detach();
        }
        match self.commands.recv() {
            Ok(StepCommand::Step) => {}
            Ok(StepCommand::Continue) => self.mode = StepMode::Continue,
            Err(_) => self.detach(),
        }
    }

    fn detach(&mut self) {
        tracing::info!("step controller disconnected, running freely");
        self.mode = StepMode::Detached;
    }
}

impl StepController {
    /// Blocks until the replay reports a completed frame. `None` once the replay has finished.
    pub fn wait_frame(&self) -> Option<u64> {
        self.frames.recv().ok()
    }

    /// Sends `command`. Returns false if the replay has finished.
    pub fn send(&self, command: StepCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_step_then_continue() {
        let (mut stepper, controller) = channel();
        let replay = thread::spawn(move || {
            for frame in 1..=5 {
                stepper.frame_completed(frame);
            }
            stepper
        });

        assert_eq!(controller.wait_frame(), Some(1));
        assert!(controller.send(StepCommand::Step));
        assert_eq!(controller.wait_frame(), Some(2));
        assert!(controller.send(StepCommand::Continue));

        let stepper = replay.join().unwrap();
        assert!(stepper.is_attached());
        drop(stepper);
        assert_eq!(controller.wait_frame(), None);
    }

    #[test]
    fn test_dropped_controller_runs_freely() {
        let (mut stepper, controller) = channel();
        drop(controller);
        stepper.frame_completed(1);
        stepper.frame_completed(2);
        assert!(!stepper.is_attached());
    }
}
