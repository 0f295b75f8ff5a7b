//! AI command validation.
//!
//! | Step | Checks |
//! |------|--------|
//! | 1 sources | each source single and supported by the family |
//! | 2 arguments | zero arguments of `NOW`/`INT`/`NONE`, clamp external line numbers |
//! | 3 bounds | scan and convert periods, scan length, stop count |
//! | 4 quantization | timer periods exactly achievable, scan fits its conversions |

use comedi_core::{
    ChanDesc, ChanFlags, CmdTestStep, Command, CommandMask, Corrections, Result, RoundMode,
    TrigSrc,
};

use crate::device::NiMio;
use crate::timing::{max_period, quantize, SI2_MAX, SI_MAX};

/// Highest PFI/RTSI line an external trigger can name.
const EXT_LINE_MAX: u32 = 16;

pub(crate) fn cmd_mask(dev: &NiMio) -> CommandMask {
    CommandMask {
        start_src: TrigSrc::NOW | TrigSrc::INT | TrigSrc::EXT,
        scan_begin_src: TrigSrc::TIMER | TrigSrc::EXT,
        convert_src: dev.family.ai_convert_sources(),
        scan_end_src: TrigSrc::COUNT,
        stop_src: TrigSrc::COUNT | TrigSrc::NONE,
    }
}

/// External trigger argument with the line clamped and only `keep` flags
/// retained.
pub(crate) fn ext_arg(arg: u32, keep: ChanFlags) -> u32 {
    ChanDesc::from_raw(arg).chan().min(EXT_LINE_MAX) | (arg & keep.bits())
}

pub(crate) fn cmdtest(dev: &NiMio, cmd: &mut Command) -> Result<()> {
    cmd_mask(dev).check(cmd)?;

    let mut fix = Corrections::new(CmdTestStep::Arguments);
    match cmd.start_src {
        TrigSrc::EXT => {
            let arg = ext_arg(cmd.start_arg, ChanFlags::INVERT | ChanFlags::EDGE);
            fix.force(&mut cmd.start_arg, arg);
        }
        _ => fix.force(&mut cmd.start_arg, 0),
    }
    if cmd.scan_begin_src == TrigSrc::EXT {
        let arg = ext_arg(cmd.scan_begin_arg, ChanFlags::INVERT | ChanFlags::EDGE);
        fix.force(&mut cmd.scan_begin_arg, arg);
    }
    match cmd.convert_src {
        TrigSrc::EXT => {
            let arg = ext_arg(cmd.convert_arg, ChanFlags::ALT_FILTER | ChanFlags::INVERT);
            fix.force(&mut cmd.convert_arg, arg);
        }
        TrigSrc::NOW => fix.force(&mut cmd.convert_arg, 0),
        _ => {}
    }
    if cmd.stop_src == TrigSrc::NONE {
        fix.force(&mut cmd.stop_arg, 0);
    }
    fix.finish()?;

    let board = dev.board;
    let nb_chan = cmd.nb_chan();
    let mut fix = Corrections::new(CmdTestStep::Bounds);
    if cmd.scan_begin_src == TrigSrc::TIMER {
        fix.at_least(
            &mut cmd.scan_begin_arg,
            dev.family.min_scan_period(board, nb_chan),
        );
        fix.at_most(&mut cmd.scan_begin_arg, max_period(SI_MAX));
    }
    if cmd.convert_src == TrigSrc::TIMER {
        if dev.family.simultaneous() {
            fix.force(&mut cmd.convert_arg, 0);
        } else {
            fix.at_least(&mut cmd.convert_arg, board.ai_speed);
            fix.at_most(&mut cmd.convert_arg, max_period(SI2_MAX));
        }
    }
    fix.force(&mut cmd.scan_end_arg, nb_chan);
    if cmd.stop_src == TrigSrc::COUNT {
        fix.at_most(&mut cmd.stop_arg, dev.family.ai_stop_count_max(board));
        fix.at_least(&mut cmd.stop_arg, 1);
    }
    fix.finish()?;

    let round = cmd.flags.round_mode();
    let mut fix = Corrections::new(CmdTestStep::Quantization);
    if cmd.scan_begin_src == TrigSrc::TIMER {
        let arg = quantize(cmd.scan_begin_arg, round);
        fix.force(&mut cmd.scan_begin_arg, arg);
    }
    if cmd.convert_src == TrigSrc::TIMER && !dev.family.simultaneous() {
        let arg = quantize(cmd.convert_arg, round);
        fix.force(&mut cmd.convert_arg, arg);
        if cmd.scan_begin_src == TrigSrc::TIMER {
            // the scan timer cannot stretch past its range to fit the
            // conversions, so long channel lists shorten the conversion
            let longest = quantize(
                max_period(SI_MAX) / cmd.scan_end_arg.max(1),
                RoundMode::Down,
            );
            fix.at_most(&mut cmd.convert_arg, longest);
            let needed = cmd.convert_arg.saturating_mul(cmd.scan_end_arg);
            fix.at_least(&mut cmd.scan_begin_arg, needed);
        }
    }
    fix.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRig;
    use comedi_core::{AnalogReference, CmdFlags, ComediError};

    fn cmd(nb_chan: u32) -> Command {
        Command::builder(0)
            .start(TrigSrc::NOW, 0)
            .scan_begin(TrigSrc::TIMER, 2_000_000)
            .convert(TrigSrc::TIMER, 500_000)
            .stop(TrigSrc::COUNT, 100)
            .channels((0..nb_chan).map(|c| ChanDesc::pack(c, 0, AnalogReference::Diff)))
            .build()
    }

    fn step(r: Result<()>) -> Option<CmdTestStep> {
        match r {
            Ok(()) => None,
            Err(ComediError::CmdTest { step }) => Some(step),
            Err(e) => panic!("unexpected error {e}"),
        }
    }

    #[test]
    fn test_valid_command_passes_unchanged() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut c = cmd(4);
        let before = c.clone();
        assert_eq!(step(cmdtest(&rig.driver, &mut c)), None);
        assert_eq!(c, before);
    }

    #[test]
    fn test_zero_stop_count_raised_to_one() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut c = cmd(4);
        c.stop_arg = 0;
        assert_eq!(step(cmdtest(&rig.driver, &mut c)), Some(CmdTestStep::Bounds));
        assert_eq!(c.stop_arg, 1);
        assert_eq!(step(cmdtest(&rig.driver, &mut c)), None);
    }

    #[test]
    fn test_now_convert_only_on_simultaneous_boards() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut c = cmd(1);
        c.convert_src = TrigSrc::NOW;
        assert_eq!(step(cmdtest(&rig.driver, &mut c)), Some(CmdTestStep::Sources));

        let rig = SimRig::polled("pci-6110").unwrap();
        let mut c = cmd(2);
        c.convert_src = TrigSrc::NOW;
        c.convert_arg = 7;
        assert_eq!(step(cmdtest(&rig.driver, &mut c)), Some(CmdTestStep::Arguments));
        assert_eq!(c.convert_arg, 0);
    }

    #[test]
    fn test_external_start_line_clamped_keeping_polarity() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut c = cmd(1);
        c.start_src = TrigSrc::EXT;
        c.start_arg = 40 | ChanFlags::INVERT.bits() | ChanFlags::ALT_SOURCE.bits();
        assert_eq!(step(cmdtest(&rig.driver, &mut c)), Some(CmdTestStep::Arguments));
        assert_eq!(c.start_arg, 16 | ChanFlags::INVERT.bits());
    }

    #[test]
    fn test_scan_period_floor_scales_with_channels() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut c = cmd(8);
        c.scan_begin_arg = 1_000;
        c.convert_arg = 3_000;
        assert_eq!(step(cmdtest(&rig.driver, &mut c)), Some(CmdTestStep::Bounds));
        assert_eq!(c.scan_begin_arg, 24_000);
    }

    #[test]
    fn test_simultaneous_board_zeroes_convert_timer() {
        let rig = SimRig::polled("pci-6110").unwrap();
        let mut c = cmd(2);
        assert_eq!(step(cmdtest(&rig.driver, &mut c)), Some(CmdTestStep::Bounds));
        assert_eq!(c.convert_arg, 0);
        assert_eq!(step(cmdtest(&rig.driver, &mut c)), None);
    }

    #[test]
    fn test_pipeline_reduces_stop_count_max() {
        let rig = SimRig::polled("pci-6110").unwrap();
        let mut c = cmd(1);
        c.convert_arg = 0;
        c.stop_arg = u32::MAX;
        assert_eq!(step(cmdtest(&rig.driver, &mut c)), Some(CmdTestStep::Bounds));
        assert_eq!(c.stop_arg, 0x00ff_fffd);
    }

    #[test]
    fn test_quantization_follows_round_mode() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut c = cmd(1);
        c.scan_begin_arg = 100_020;
        c.convert_arg = 10_020;
        assert_eq!(step(cmdtest(&rig.driver, &mut c)), Some(CmdTestStep::Quantization));
        assert_eq!((c.scan_begin_arg, c.convert_arg), (100_000, 10_000));

        let mut c = cmd(1);
        c.flags = CmdFlags::ROUND_UP;
        c.scan_begin_arg = 100_020;
        c.convert_arg = 10_020;
        assert_eq!(step(cmdtest(&rig.driver, &mut c)), Some(CmdTestStep::Quantization));
        assert_eq!((c.scan_begin_arg, c.convert_arg), (100_050, 10_050));
    }

    #[test]
    fn test_scan_must_fit_its_conversions() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut c = cmd(4);
        c.scan_begin_arg = 1_000_000;
        assert_eq!(step(cmdtest(&rig.driver, &mut c)), Some(CmdTestStep::Quantization));
        assert_eq!(c.scan_begin_arg, 2_000_000);
    }

    #[test]
    fn test_long_channel_list_settles_within_scan_timer() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut c = cmd(300);
        c.scan_begin_arg = max_period(SI_MAX);
        c.convert_arg = max_period(SI2_MAX);

        let mut passes = 0;
        while step(cmdtest(&rig.driver, &mut c)).is_some() {
            passes += 1;
            assert!(passes < 4, "cmdtest did not settle: {c:?}");
        }
        assert!(c.scan_begin_arg <= max_period(SI_MAX));
        assert!(c.convert_arg * 300 <= c.scan_begin_arg);
    }
}
