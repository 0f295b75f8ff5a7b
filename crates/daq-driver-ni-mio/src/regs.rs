//! DAQ-STC register map.
//!
//! Registers are addressed by their STC register number ([`stc`]); the
//! [`crate::io::Stc`] accessor turns a number into a bus access for the
//! board family (window pair on E-series, [`m_series_offset`] on M-series).
//! Board-level registers that live outside the STC have fixed offsets in
//! [`board`], [`m_series`], [`r611x`] and [`r6143`].
//!
//! Several STC numbers name a write-only register and a read-only
//! register at once (for example 12 is `AI_Mode_1` when written and
//! `G0_Save` when read).

use std::fmt;

use bitflags::bitflags;

/// STC register numbers.
#[allow(missing_docs)]
pub mod stc {
    pub const INTERRUPT_A_ACK: u32 = 2;
    pub const AI_STATUS_1: u32 = 2;
    pub const INTERRUPT_B_ACK: u32 = 3;
    pub const AO_STATUS_1: u32 = 3;
    pub const AI_COMMAND_2: u32 = 4;
    pub const G_STATUS: u32 = 4;
    pub const AO_COMMAND_2: u32 = 5;
    pub const AI_STATUS_2: u32 = 5;
    pub const G0_COMMAND: u32 = 6;
    pub const AO_STATUS_2: u32 = 6;
    pub const G1_COMMAND: u32 = 7;
    pub const DIO_PARALLEL_INPUT: u32 = 7;
    pub const AI_COMMAND_1: u32 = 8;
    pub const G0_HW_SAVE: u32 = 8;
    pub const AO_COMMAND_1: u32 = 9;
    pub const DIO_OUTPUT: u32 = 10;
    pub const G1_HW_SAVE: u32 = 10;
    pub const DIO_CONTROL: u32 = 11;
    pub const AI_MODE_1: u32 = 12;
    pub const G0_SAVE: u32 = 12;
    pub const AI_MODE_2: u32 = 13;
    pub const AI_SI_LOAD_A: u32 = 14;
    pub const G1_SAVE: u32 = 14;
    pub const AI_SI_LOAD_B: u32 = 16;
    pub const AI_SC_LOAD_A: u32 = 18;
    pub const AI_SC_LOAD_B: u32 = 20;
    pub const AI_SI2_LOAD_A: u32 = 23;
    pub const AI_SI2_LOAD_B: u32 = 25;
    pub const G0_MODE: u32 = 26;
    pub const G1_MODE: u32 = 27;
    pub const JOINT_STATUS_1: u32 = 27;
    pub const G0_LOAD_A: u32 = 28;
    pub const DIO_SERIAL_INPUT: u32 = 28;
    pub const JOINT_STATUS_2: u32 = 29;
    pub const G0_LOAD_B: u32 = 30;
    pub const G1_LOAD_A: u32 = 32;
    pub const G1_LOAD_B: u32 = 34;
    pub const G0_INPUT_SELECT: u32 = 36;
    pub const G1_INPUT_SELECT: u32 = 37;
    pub const AO_MODE_1: u32 = 38;
    pub const AO_MODE_2: u32 = 39;
    pub const AO_UI_LOAD_A: u32 = 40;
    pub const AO_UI_LOAD_B: u32 = 42;
    pub const AO_BC_LOAD_A: u32 = 44;
    pub const AO_BC_LOAD_B: u32 = 46;
    pub const AO_UC_LOAD_A: u32 = 48;
    pub const AO_UC_LOAD_B: u32 = 50;
    pub const CLOCK_AND_FOUT: u32 = 56;
    pub const IO_BIDIRECTION_PIN: u32 = 57;
    pub const RTSI_TRIG_DIRECTION: u32 = 58;
    pub const INTERRUPT_CONTROL: u32 = 59;
    pub const AI_OUTPUT_CONTROL: u32 = 60;
    pub const ANALOG_TRIGGER_ETC: u32 = 61;
    pub const AI_START_STOP_SELECT: u32 = 62;
    pub const AI_TRIGGER_SELECT: u32 = 63;
    pub const AI_DIV_LOAD_A: u32 = 64;
    pub const AO_START_SELECT: u32 = 66;
    pub const AO_TRIGGER_SELECT: u32 = 67;
    pub const G0_AUTOINCREMENT: u32 = 68;
    pub const G1_AUTOINCREMENT: u32 = 69;
    pub const AO_MODE_3: u32 = 70;
    pub const JOINT_RESET: u32 = 72;
    pub const INTERRUPT_A_ENABLE: u32 = 73;
    pub const SECOND_IRQ_A_ENABLE: u32 = 74;
    pub const INTERRUPT_B_ENABLE: u32 = 75;
    pub const SECOND_IRQ_B_ENABLE: u32 = 76;
    pub const AI_PERSONAL: u32 = 77;
    pub const AO_PERSONAL: u32 = 78;
    pub const RTSI_TRIG_A_OUTPUT: u32 = 79;
    pub const RTSI_TRIG_B_OUTPUT: u32 = 80;
    pub const CONFIGURATION_MEMORY_CLEAR: u32 = 82;
    pub const ADC_FIFO_CLEAR: u32 = 83;
    pub const DAC_FIFO_CLEAR: u32 = 84;
    pub const AO_OUTPUT_CONTROL: u32 = 86;
    pub const AI_MODE_3: u32 = 87;
}

/// Offset of a 16-bit STC register on the M-series bus.
pub fn m_series_offset(reg: u32) -> Option<u32> {
    let offset = match reg {
        stc::INTERRUPT_A_ACK => 0x104,
        stc::INTERRUPT_B_ACK => 0x106,
        stc::AI_COMMAND_2 => 0x108,
        stc::AO_COMMAND_2 => 0x10a,
        stc::G0_COMMAND => 0x10c,
        stc::G1_COMMAND => 0x10e,
        stc::AI_COMMAND_1 => 0x110,
        stc::AO_COMMAND_1 => 0x112,
        stc::AI_MODE_1 => 0x118,
        stc::AI_MODE_2 => 0x11a,
        stc::AI_SI2_LOAD_A => 0x12c,
        stc::AI_SI2_LOAD_B => 0x130,
        stc::G0_MODE => 0x134,
        stc::G1_MODE => 0x136,
        stc::JOINT_STATUS_2 => 0x13a,
        stc::G0_INPUT_SELECT => 0x148,
        stc::G1_INPUT_SELECT => 0x14a,
        stc::AO_MODE_1 => 0x14c,
        stc::AO_MODE_2 => 0x14e,
        stc::CLOCK_AND_FOUT => 0x170,
        stc::IO_BIDIRECTION_PIN => 0x172,
        stc::RTSI_TRIG_DIRECTION => 0x174,
        stc::INTERRUPT_CONTROL => 0x176,
        stc::AI_OUTPUT_CONTROL => 0x178,
        stc::ANALOG_TRIGGER_ETC => 0x17a,
        stc::AI_START_STOP_SELECT => 0x17c,
        stc::AI_TRIGGER_SELECT => 0x17e,
        stc::AO_START_SELECT => 0x184,
        stc::AO_TRIGGER_SELECT => 0x186,
        stc::G0_AUTOINCREMENT => 0x188,
        stc::G1_AUTOINCREMENT => 0x18a,
        stc::AO_MODE_3 => 0x18c,
        stc::JOINT_RESET => 0x190,
        stc::INTERRUPT_A_ENABLE => 0x192,
        stc::INTERRUPT_B_ENABLE => 0x196,
        stc::AI_PERSONAL => 0x19a,
        stc::AO_PERSONAL => 0x19c,
        stc::RTSI_TRIG_A_OUTPUT => 0x19e,
        stc::RTSI_TRIG_B_OUTPUT => 0x1a0,
        stc::CONFIGURATION_MEMORY_CLEAR => 0x1a4,
        stc::ADC_FIFO_CLEAR => 0x1a6,
        stc::DAC_FIFO_CLEAR => 0x1a8,
        stc::AO_OUTPUT_CONTROL => 0x1ac,
        stc::AI_MODE_3 => 0x1ae,
        _ => return None,
    };
    Some(offset)
}

/// Offset of a 32-bit STC register pair on the M-series bus.
pub fn m_series_offset32(reg: u32) -> Option<u32> {
    let offset = match reg {
        stc::G0_HW_SAVE => 0x110,
        stc::G1_HW_SAVE => 0x114,
        stc::AI_MODE_1 => 0x118,
        stc::AI_SI_LOAD_A => 0x11c,
        stc::AI_SI_LOAD_B => 0x120,
        stc::AI_SC_LOAD_A => 0x124,
        stc::AI_SC_LOAD_B => 0x128,
        stc::G0_LOAD_A => 0x138,
        stc::G0_LOAD_B => 0x13c,
        stc::G1_LOAD_A => 0x140,
        stc::G1_LOAD_B => 0x144,
        stc::AO_UI_LOAD_A => 0x150,
        stc::AO_UI_LOAD_B => 0x154,
        stc::AO_BC_LOAD_A => 0x158,
        stc::AO_BC_LOAD_B => 0x15c,
        stc::AO_UC_LOAD_A => 0x160,
        stc::AO_UC_LOAD_B => 0x164,
        stc::AI_DIV_LOAD_A => 0x180,
        _ => return None,
    };
    Some(offset)
}

/// E-series board registers outside the STC window.
#[allow(missing_docs)]
pub mod board {
    pub const WINDOW_ADDRESS: u32 = 0x00;
    pub const WINDOW_DATA: u32 = 0x02;
    pub const XXX_STATUS: u32 = 0x01;
    pub const AI_AO_SELECT: u32 = 0x09;
    pub const G0_G1_SELECT: u32 = 0x0b;
    pub const SERIAL_COMMAND: u32 = 0x0d;
    pub const MISC_COMMAND: u32 = 0x0f;
    pub const CONFIGURATION_MEMORY_LOW: u32 = 0x10;
    pub const CONFIGURATION_MEMORY_HIGH: u32 = 0x12;
    pub const AO_CONFIGURATION: u32 = 0x16;
    pub const DAC0_DIRECT_DATA: u32 = 0x18;
    pub const DAC1_DIRECT_DATA: u32 = 0x1a;
    pub const ADC_FIFO_DATA: u32 = 0x1c;
    pub const DAC_FIFO_DATA: u32 = 0x1e;
    pub const PORT_A: u32 = 0x19;

    /// `XXX_Status`: EEPROM serial output
    pub const PROMOUT: u8 = 0x01;
    /// `XXX_Status`: one 16-bit sample stranded in the lower FIFO half (611x)
    pub const AI_FIFO_LOWER_NOT_EMPTY: u8 = 0x80;

    /// `Serial_Command` bits
    pub const SERIAL_CLOCK: u8 = 0x01;
    pub const SERIAL_DATA: u8 = 0x02;
    pub const EEPROM_CS: u8 = 0x04;
    /// Caldac load strobe for caldac `i`
    pub const fn ser_dac_ld(i: usize) -> u8 {
        0x08 << i
    }

    /// `Configuration_Memory_Low` bits
    pub const AI_LAST_CHANNEL: u16 = 0x8000;
    pub const AI_DITHER: u16 = 0x0200;

    /// `Configuration_Memory_High` bits
    pub const AI_DIFFERENTIAL: u16 = 1 << 12;
    pub const AI_COMMON: u16 = 2 << 12;
    pub const AI_GROUND: u16 = 3 << 12;
    pub const fn ai_config_channel(chan: u32) -> u16 {
        (chan & 0x3f) as u16
    }

    /// `AO_Configuration` bits
    pub const fn ao_channel(chan: u32) -> u16 {
        ((chan & 0xf) << 8) as u16
    }
    pub const AO_BIPOLAR: u16 = 0x0001;
    pub const AO_DEGLITCH: u16 = 0x0002;
    pub const AO_EXT_REF: u16 = 0x0004;
    pub const AO_GROUND_REF: u16 = 0x0008;

    /// DMA select bitfields of `AI_AO_Select`
    pub const AI_DMA_SELECT_SHIFT: u32 = 0;
    pub const AI_DMA_SELECT_MASK: u8 = 0x0f;
    pub const AO_DMA_SELECT_SHIFT: u32 = 4;
    pub const AO_DMA_SELECT_MASK: u8 = 0xf0;

    /// `G0_G1_Select` bitfield of counter `gpct`
    pub const fn gpct_dma_select_mask(gpct: usize) -> u8 {
        0x0f << (4 * gpct)
    }
}

/// M-series registers outside the STC map.
#[allow(missing_docs)]
pub mod m_series {
    pub const CDIO_DMA_SELECT: u32 = 0x07;
    pub const AI_FIFO_DATA: u32 = 0x1c;
    pub const STATIC_DIGITAL_OUTPUT: u32 = 0x24;
    pub const STATIC_DIGITAL_INPUT: u32 = 0x24;
    pub const DIO_DIRECTION: u32 = 0x28;
    pub const CAL_PWM: u32 = 0x40;
    pub const AI_CONFIG_FIFO_DATA: u32 = 0x5e;
    pub const AO_CALIBRATION: u32 = 0xa3;
    pub const AO_FIFO_DATA: u32 = 0xa4;
    pub const PFI_FILTER: u32 = 0xb0;
    pub const PFI_DI: u32 = 0x1dc;
    pub const PFI_DO: u32 = 0x1de;
    pub const AI_CONFIG_FIFO_BYPASS: u32 = 0x218;
    pub const CDO_FIFO_DATA: u32 = 0x220;
    pub const CDIO_STATUS: u32 = 0x224;
    pub const CDIO_COMMAND: u32 = 0x224;
    pub const CDO_MODE: u32 = 0x22c;
    pub const CDO_MASK_ENABLE: u32 = 0x234;
    /// Start of the EEPROM image the board preloads at power-up
    pub const EEPROM_IMAGE: u32 = 0x400;

    /// Counter registers that only exist on M-series boards, indexed by
    /// counter.
    pub const fn g_counting_mode(i: usize) -> u32 {
        0x1b0 + 2 * i as u32
    }
    pub const fn g_second_gate(i: usize) -> u32 {
        0x1b4 + 2 * i as u32
    }
    pub const fn g_dma_config(i: usize) -> u32 {
        0x1b8 + 2 * i as u32
    }
    pub const fn g_dma_status(i: usize) -> u32 {
        0x1b8 + 2 * i as u32
    }
    pub const fn g_abz(i: usize) -> u32 {
        0x1c0 + 2 * i as u32
    }

    pub const fn dac_direct_data(chan: u32) -> u32 {
        0xc0 + 0x4 * chan
    }
    pub const fn ao_waveform_order(chan: u32) -> u32 {
        0xc2 + 0x4 * chan
    }
    pub const fn ao_config_bank(chan: u32) -> u32 {
        0xc3 + 0x4 * chan
    }
    pub const fn ao_reference_attenuation(chan: u32) -> u32 {
        0x264 + chan
    }
    pub const fn static_ai_control(i: u32) -> u32 {
        0x64 + i
    }
    /// PFI output select register `n` (1..=6), three PFI lines each
    pub const fn pfi_output_select(n: u32) -> u32 {
        0x1d0 + 2 * (n - 1)
    }

    /// `AI_Config_FIFO_Data` bits
    pub const AI_CONFIG_CHANNEL_TYPE_DIFFERENTIAL: u16 = 1 << 6;
    pub const AI_CONFIG_CHANNEL_TYPE_COMMON_REF: u16 = 2 << 6;
    pub const AI_CONFIG_CHANNEL_TYPE_GROUND_REF: u16 = 3 << 6;
    pub const AI_CONFIG_POLARITY: u16 = 1 << 12;
    pub const AI_CONFIG_DITHER: u16 = 1 << 13;
    pub const AI_CONFIG_LAST_CHANNEL: u16 = 1 << 14;
    pub const fn ai_config_channel(chan: u32) -> u16 {
        (chan & 0xf) as u16
    }
    pub const fn ai_config_bank(chan: u32) -> u16 {
        (((chan >> 4) & 0x3) << 4) as u16
    }
    pub const fn ai_config_gain(code: u16) -> u16 {
        (code & 0x7) << 9
    }

    /// `AI_Config_FIFO_Bypass` bits
    pub const AI_BYPASS_CONFIG_FIFO: u32 = 1 << 31;
    pub const AI_BYPASS_CAL_SEL_POS_MASK: u32 = 0x7 << 27;
    pub const AI_BYPASS_CAL_SEL_NEG_MASK: u32 = 0x7 << 24;
    pub const AI_BYPASS_MODE_MUX_MASK: u32 = 0x3 << 22;
    pub const AO_BYPASS_AO_CAL_SEL_MASK: u32 = 0x7 << 19;
    pub const AI_BYPASS_POLARITY: u32 = 1 << 9;
    pub const AI_BYPASS_DITHER: u32 = 1 << 8;
    pub const fn ai_bypass_gain(code: u16) -> u32 {
        ((code & 0x7) as u32) << 16
    }

    /// `AO_Config_Bank` bits
    pub const AO_DAC_REFERENCE_10V_INTERNAL: u8 = 0x0;
    pub const AO_DAC_REFERENCE_5V_INTERNAL: u8 = 0x8;
    pub const AO_DAC_OFFSET_0V: u8 = 0x0;
    pub const AO_DAC_OFFSET_5V: u8 = 0x10;
    pub const AO_UPDATE_TIMED: u8 = 0x40;
    pub const AO_ATTENUATE_X5: u8 = 0x1;

    /// `CDIO_Command` bits
    pub const CDO_ARM: u32 = 0x2;
    pub const CDO_DISARM: u32 = 0x1;
    pub const CDO_FIFO_REQUEST_INTERRUPT_ENABLE: u32 = 0x4;
    pub const CDO_RESET: u32 = 0x10;
    pub const CDI_RESET: u32 = 0x20;
    pub const CDO_ERROR_INTERRUPT_ENABLE_SET: u32 = 0x40;
    pub const CDO_ERROR_INTERRUPT_ENABLE_CLEAR: u32 = 0x80;
    pub const CDO_FIFO_REQUEST_INTERRUPT_ENABLE_CLEAR: u32 = 0x800;
    pub const CDO_ERROR_INTERRUPT_CONFIRM: u32 = 0x4000;
    pub const CDO_EMPTY_FIFO_INTERRUPT_ENABLE_SET: u32 = 0x1_0000;
    pub const CDO_EMPTY_FIFO_INTERRUPT_ENABLE_CLEAR: u32 = 0x2_0000;
    pub const CDO_SW_UPDATE: u32 = 0x8_0000;

    /// `CDIO_Status` bits
    pub const CDO_FIFO_EMPTY: u32 = 0x1;
    pub const CDO_FIFO_FULL: u32 = 0x2;
    pub const CDO_OVERRUN: u32 = 0x8;
    pub const CDO_UNDERFLOW: u32 = 0x10;

    /// `CDO_Mode` bits
    pub const CDO_FIFO_MODE: u32 = 0x100;
    pub const CDO_POLARITY: u32 = 0x200;
    pub const CDO_HALT_ON_ERROR: u32 = 0x800;
    pub const CDO_SAMPLE_SOURCE_SELECT_MASK: u32 = 0xf;

    /// `CDIO_DMA_Select` CDO bitfield
    pub const CDO_DMA_SELECT_SHIFT: u32 = 4;
    pub const CDO_DMA_SELECT_MASK: u8 = 0xf0;
}

/// 611x-only board registers.
#[allow(missing_docs)]
pub mod r611x {
    pub const CAL_GAIN_SELECT: u32 = 0x05;
    pub const DAC_FIFO_DATA: u32 = 0x14;
    pub const AO_WINDOW_ADDRESS: u32 = 0x18;
    pub const MAGIC: u32 = 0x19;
    pub const CALIBRATION_CHANNEL_SELECT: u32 = 0x1a;
    pub const ADC_FIFO_DATA: u32 = 0x1c;
    pub const AO_WINDOW_DATA: u32 = 0x1e;

    /// Addresses behind the AO window.
    pub mod window {
        pub const AO_TIMED: u16 = 0x10;
        pub const AO_IMMEDIATE: u16 = 0x11;
        pub const AO_FIFO_OFFSET_LOAD: u16 = 0x13;
        pub const AO_WAVEFORM_GENERATION: u16 = 0x15;
        pub const AO_MISC: u16 = 0x16;
        /// Direct data register of DAC `chan`
        pub const fn dac_direct_data(chan: u32) -> u16 {
            (chan & 0xf) as u16
        }

        /// `AO_Misc` bits
        pub const CLEAR_WG: u16 = 1;
    }
}

/// 6143-only board registers.
#[allow(missing_docs)]
pub mod r6143 {
    pub const MAGIC: u32 = 0x19;
    pub const PIPELINE_DELAY: u32 = 0x1f;
    pub const EOC_SET: u32 = 0x1d;
    pub const CALIBRATION_LOW_TIME: u32 = 0x20;
    pub const CALIBRATION_HIGH_TIME: u32 = 0x22;
    pub const CALIBRATION_CHANNEL: u32 = 0x42;
    pub const AIFIFO_FLAG: u32 = 0x84;
    pub const AIFIFO_CONTROL: u32 = 0x88;
    pub const AIFIFO_STATUS: u32 = 0x88;
    pub const AIFIFO_DATA: u32 = 0x8c;

    pub const CALIBRATION_CHANNEL_RELAY_ON: u16 = 0x8000;
    pub const CALIBRATION_CHANNEL_RELAY_OFF: u16 = 0x4000;

    /// `AIFIFO_Status` bits
    pub const FIFO_STRANDED_SAMPLE: u32 = 0x01;
    pub const FIFO_NOT_EMPTY: u32 = 0x04;
    pub const FIFO_FLUSHING: u32 = 0x10;
}

/// `AI_Command_1` bits.
#[allow(missing_docs)]
pub mod ai_command_1 {
    pub const ANALOG_TRIGGER_RESET: u16 = 1 << 14;
    pub const DISARM: u16 = 1 << 13;
    pub const SI2_ARM: u16 = 1 << 12;
    pub const SI2_LOAD: u16 = 1 << 11;
    pub const SI_ARM: u16 = 1 << 10;
    pub const SI_LOAD: u16 = 1 << 9;
    pub const DIV_ARM: u16 = 1 << 8;
    pub const DIV_LOAD: u16 = 1 << 7;
    pub const SC_ARM: u16 = 1 << 6;
    pub const SC_LOAD: u16 = 1 << 5;
    pub const CONVERT_PULSE: u16 = 1 << 0;
}

/// `AI_Command_2` bits.
#[allow(missing_docs)]
pub mod ai_command_2 {
    pub const END_ON_SC_TC: u16 = 1 << 15;
    pub const END_ON_END_OF_SCAN: u16 = 1 << 14;
    pub const START1_DISABLE: u16 = 1 << 11;
    pub const STOP_PULSE: u16 = 1 << 3;
    pub const START_PULSE: u16 = 1 << 2;
    pub const START2_PULSE: u16 = 1 << 1;
    pub const START1_PULSE: u16 = 1 << 0;
}

/// `AI_Mode_1` bits.
#[allow(missing_docs)]
pub mod ai_mode_1 {
    pub const fn convert_source_select(x: u32) -> u16 {
        ((x & 0x1f) << 11) as u16
    }
    pub const fn si_source_select(x: u32) -> u16 {
        ((x & 0x1f) << 6) as u16
    }
    pub const CONVERT_SOURCE_POLARITY: u16 = 1 << 5;
    pub const SI_SOURCE_POLARITY: u16 = 1 << 4;
    pub const START_STOP: u16 = 1 << 3;
    pub const RESERVED: u16 = 1 << 2;
    pub const CONTINUOUS: u16 = 1 << 1;
    pub const TRIGGER_ONCE: u16 = 1 << 0;
}

/// `AI_Mode_2` bits.
#[allow(missing_docs)]
pub mod ai_mode_2 {
    pub const SC_GATE_ENABLE: u16 = 1 << 15;
    pub const START_STOP_GATE_ENABLE: u16 = 1 << 14;
    pub const PRE_TRIGGER: u16 = 1 << 13;
    pub const SI2_INITIAL_LOAD_SOURCE: u16 = 1 << 9;
    pub const SI2_RELOAD_MODE: u16 = 1 << 8;
    pub const SI_INITIAL_LOAD_SOURCE: u16 = 1 << 7;
    pub const fn si_reload_mode(x: u32) -> u16 {
        ((x & 0x7) << 4) as u16
    }
    pub const SC_INITIAL_LOAD_SOURCE: u16 = 1 << 2;
    pub const SC_RELOAD_MODE: u16 = 1 << 1;
}

/// `AI_Mode_3` bits.
#[allow(missing_docs)]
pub mod ai_mode_3 {
    pub const TRIGGER_LENGTH: u16 = 1 << 15;
    pub const FIFO_MODE_MASK: u16 = 3 << 6;
    pub const FIFO_MODE_HF_TO_E: u16 = 3 << 6;
    pub const FIFO_MODE_F: u16 = 2 << 6;
    pub const FIFO_MODE_HF: u16 = 1 << 6;
    pub const FIFO_MODE_NE: u16 = 0;
}

/// `AI_START_STOP_Select` bits.
#[allow(missing_docs)]
pub mod ai_start_stop {
    pub const START_POLARITY: u16 = 1 << 15;
    pub const STOP_POLARITY: u16 = 1 << 14;
    pub const STOP_SYNC: u16 = 1 << 13;
    pub const STOP_EDGE: u16 = 1 << 12;
    pub const fn stop_select(x: u32) -> u16 {
        ((x & 0x1f) << 7) as u16
    }
    pub const START_SYNC: u16 = 1 << 6;
    pub const START_EDGE: u16 = 1 << 5;
    pub const fn start_select(x: u32) -> u16 {
        (x & 0x1f) as u16
    }
}

/// `AI_Trigger_Select` bits.
#[allow(missing_docs)]
pub mod ai_trigger_select {
    pub const START1_POLARITY: u16 = 1 << 15;
    pub const START2_POLARITY: u16 = 1 << 14;
    pub const START2_SYNC: u16 = 1 << 13;
    pub const START2_EDGE: u16 = 1 << 12;
    pub const fn start2_select(x: u32) -> u16 {
        ((x & 0x1f) << 7) as u16
    }
    pub const START1_SYNC: u16 = 1 << 6;
    pub const START1_EDGE: u16 = 1 << 5;
    pub const fn start1_select(x: u32) -> u16 {
        (x & 0x1f) as u16
    }
}

/// `AI_Personal` bits.
#[allow(missing_docs)]
pub mod ai_personal {
    pub const SHIFTIN_PULSE_WIDTH: u16 = 1 << 15;
    pub const SOC_POLARITY: u16 = 1 << 13;
    pub const CONVERT_PULSE_WIDTH: u16 = 1 << 10;
    pub const OVERRUN_MODE: u16 = 1 << 7;
    pub const LOCALMUX_CLK_PULSE_WIDTH: u16 = 1 << 5;
}

/// `AI_Output_Control` fields.
#[allow(missing_docs)]
pub mod ai_output_control {
    pub const fn scan_in_prog_select(x: u16) -> u16 {
        (x & 3) << 12
    }
    pub const fn extmux_clk_select(x: u16) -> u16 {
        (x & 3) << 6
    }
    pub const fn localmux_clk_select(x: u16) -> u16 {
        (x & 3) << 4
    }
    pub const fn sc_tc_select(x: u16) -> u16 {
        (x & 3) << 2
    }
    pub const CONVERT_ENABLE_LOW: u16 = 2;
    pub const CONVERT_ENABLE_HIGH: u16 = 3;
}

/// `Joint_Reset` bits.
#[allow(missing_docs)]
pub mod joint_reset {
    pub const AO_CONFIGURATION_END: u16 = 1 << 9;
    pub const AI_CONFIGURATION_END: u16 = 1 << 8;
    pub const AO_CONFIGURATION_START: u16 = 1 << 5;
    pub const AI_CONFIGURATION_START: u16 = 1 << 4;
    pub const G1_RESET: u16 = 1 << 3;
    pub const G0_RESET: u16 = 1 << 2;
    pub const AO_RESET: u16 = 1 << 1;
    pub const AI_RESET: u16 = 1 << 0;
}

/// `AO_Command_1` bits.
#[allow(missing_docs)]
pub mod ao_command_1 {
    pub const DISARM: u16 = 1 << 13;
    pub const UI_ARM: u16 = 1 << 10;
    pub const UI_LOAD: u16 = 1 << 9;
    pub const UC_ARM: u16 = 1 << 8;
    pub const UC_LOAD: u16 = 1 << 7;
    pub const BC_ARM: u16 = 1 << 6;
    pub const BC_LOAD: u16 = 1 << 5;
    pub const DAC1_UPDATE_MODE: u16 = 1 << 4;
    pub const DAC0_UPDATE_MODE: u16 = 1 << 2;
    pub const UPDATE_PULSE: u16 = 1 << 0;
}

/// `AO_Command_2` bits.
#[allow(missing_docs)]
pub mod ao_command_2 {
    pub const BC_GATE_ENABLE: u16 = 1 << 11;
    pub const START1_PULSE: u16 = 1 << 0;
}

/// `AO_Mode_1` bits.
#[allow(missing_docs)]
pub mod ao_mode_1 {
    pub const fn update_source_select(x: u32) -> u16 {
        ((x & 0x1f) << 11) as u16
    }
    pub const fn ui_source_select(x: u32) -> u16 {
        ((x & 0x1f) << 6) as u16
    }
    pub const MULTIPLE_CHANNELS: u16 = 1 << 5;
    pub const UPDATE_SOURCE_POLARITY: u16 = 1 << 4;
    pub const UI_SOURCE_POLARITY: u16 = 1 << 3;
    pub const CONTINUOUS: u16 = 1 << 1;
    pub const TRIGGER_ONCE: u16 = 1 << 0;
}

/// `AO_Mode_2` bits.
#[allow(missing_docs)]
pub mod ao_mode_2 {
    pub const FIFO_MODE_MASK: u16 = 3 << 14;
    pub const FIFO_MODE_HF_TO_F: u16 = 3 << 14;
    pub const FIFO_MODE_F: u16 = 2 << 14;
    pub const FIFO_MODE_HF: u16 = 1 << 14;
    pub const FIFO_RETRANSMIT_ENABLE: u16 = 1 << 13;
    pub const UC_INITIAL_LOAD_SOURCE: u16 = 1 << 11;
    pub const UI_INITIAL_LOAD_SOURCE: u16 = 1 << 7;
    pub const UI_RELOAD_MODE_MASK: u16 = 7 << 4;
    pub const BC_INITIAL_LOAD_SOURCE: u16 = 1 << 2;
}

/// `AO_Mode_3` bits.
#[allow(missing_docs)]
pub mod ao_mode_3 {
    pub const TRIGGER_LENGTH: u16 = 1 << 11;
    pub const STOP_ON_OVERRUN_ERROR: u16 = 1 << 5;
    pub const NOT_AN_UPDATE: u16 = 1 << 2;
    pub const LAST_GATE_DISABLE: u16 = 1 << 0;
}

/// `AO_Trigger_Select` bits.
#[allow(missing_docs)]
pub mod ao_trigger_select {
    pub const START1_POLARITY: u16 = 1 << 13;
    pub const START1_SYNC: u16 = 1 << 6;
    pub const START1_EDGE: u16 = 1 << 5;
    pub const START1_SELECT_MASK: u16 = 0x1f;
}

/// `AO_Start_Select` bits.
#[allow(missing_docs)]
pub mod ao_start_select {
    pub const AOFREQ_ENABLE: u16 = 1 << 12;
}

/// `AO_Personal` bits.
#[allow(missing_docs)]
pub mod ao_personal {
    pub const BC_SOURCE_SELECT: u16 = 1 << 4;
    pub const UPDATE_PULSE_WIDTH: u16 = 1 << 5;
    pub const DMA_PIO_CONTROL: u16 = 1 << 8;
    pub const FIFO_ENABLE: u16 = 1 << 10;
    pub const TMRDACWR_PULSE_WIDTH: u16 = 1 << 12;
}

/// `AO_Output_Control` fields.
#[allow(missing_docs)]
pub mod ao_output_control {
    pub const fn number_of_channels(n: u32) -> u16 {
        ((n & 0xf) << 6) as u16
    }
    pub const UPDATE_OUTPUT_HIGH_Z: u16 = 0;
}

/// `Joint_Status_1`/`Joint_Status_2` bits.
#[allow(missing_docs)]
pub mod joint_status {
    pub const DIO_SERIAL_IO_IN_PROGRESS: u16 = 1 << 12;
    pub const AO_TMRDACWRS_IN_PROGRESS: u16 = 1 << 5;
}

/// `DIO_Control` and `DIO_Output` fields.
#[allow(missing_docs)]
pub mod dio {
    pub const SOFTWARE_SERIAL_CONTROL: u16 = 1 << 11;
    pub const HW_SERIAL_TIMEBASE: u16 = 1 << 10;
    pub const HW_SERIAL_ENABLE: u16 = 1 << 9;
    pub const HW_SERIAL_START: u16 = 1 << 8;
    pub const PINS_DIR_MASK: u16 = 0xff;
    pub const fn pins_dir(x: u32) -> u16 {
        (x & 0xff) as u16
    }
    pub const fn serial_data_out(x: u32) -> u16 {
        ((x & 0xff) << 8) as u16
    }
    pub const SERIAL_DATA_MASK: u16 = 0xff00;
    pub const fn parallel_data_out(x: u32) -> u16 {
        (x & 0xff) as u16
    }
    pub const PARALLEL_DATA_MASK: u16 = 0xff;
    /// Serial input line on the parallel port
    pub const SDIN: u32 = 1 << 4;
    /// Serial output line on the parallel port
    pub const SDOUT: u32 = 1 << 0;
}

/// `Clock_and_FOUT` bits.
#[allow(missing_docs)]
pub mod clock_and_fout {
    pub const FOUT_ENABLE: u16 = 1 << 15;
    pub const FOUT_TIMEBASE_SELECT: u16 = 1 << 14;
    pub const DIO_SERIAL_OUT_DIVIDE_BY_2: u16 = 1 << 13;
    pub const SLOW_INTERNAL_TIME_DIVIDE_BY_2: u16 = 1 << 12;
    pub const SLOW_INTERNAL_TIMEBASE: u16 = 1 << 11;
    pub const CLOCK_TO_BOARD_DIVIDE_BY_2: u16 = 1 << 9;
    pub const CLOCK_TO_BOARD: u16 = 1 << 8;
    pub const AI_OUTPUT_DIVIDE_BY_2: u16 = 1 << 7;
    pub const AO_OUTPUT_DIVIDE_BY_2: u16 = 1 << 5;
    pub const FOUT_DIVIDER_MASK: u16 = 0xf;
}

/// `Interrupt_Control` fields.
#[allow(missing_docs)]
pub mod interrupt_control {
    pub const INTERRUPT_B_ENABLE: u16 = 1 << 15;
    pub const fn interrupt_b_output_select(x: u32) -> u16 {
        ((x & 0x7) << 12) as u16
    }
    pub const INTERRUPT_A_ENABLE: u16 = 1 << 11;
    pub const fn interrupt_a_output_select(x: u32) -> u16 {
        ((x & 0x7) << 8) as u16
    }
    pub const INTERRUPT_OUTPUT_POLARITY: u16 = 1 << 0;
}

/// `Analog_Trigger_Etc` bits.
#[allow(missing_docs)]
pub mod analog_trigger_etc {
    pub const ANALOG_TRIGGER_ENABLE: u16 = 1 << 3;
}

/// General-purpose counter `Gi_Command` bits.
#[allow(missing_docs)]
pub mod g_command {
    pub const ARM: u16 = 0x0001;
    pub const SAVE_TRACE: u16 = 0x0002;
    pub const LOAD: u16 = 0x0004;
    pub const DISARM: u16 = 0x0010;
    pub const UP_DOWN_SHIFT: u32 = 5;
    pub const UP_DOWN_MASK: u16 = 0x3 << 5;
}

/// General-purpose counter `Gi_Input_Select` fields.
#[allow(missing_docs)]
pub mod g_input_select {
    pub const SOURCE_SHIFT: u32 = 2;
    pub const SOURCE_MASK: u16 = 0x1f << 2;
    pub const GATE_SHIFT: u32 = 7;
    pub const GATE_MASK: u16 = 0x1f << 7;
    /// Source select code of the 20 MHz timebase
    pub const TIMEBASE_1: u32 = 0;
    /// Source select code of the 100 kHz timebase
    pub const TIMEBASE_2: u32 = 18;
}

/// `G_Status` bits of counter `i`.
#[allow(missing_docs)]
pub mod g_status {
    pub const fn counting(i: usize) -> u16 {
        0x4 << i
    }
    pub const fn armed(i: usize) -> u16 {
        0x100 << i
    }
}

/// Second IRQ enable bits for the counter gate interrupts (E-series).
#[allow(missing_docs)]
pub mod second_irq {
    pub const G0_GATE_SECOND_IRQ_ENABLE: u16 = 1 << 8;
    pub const G1_GATE_SECOND_IRQ_ENABLE: u16 = 1 << 10;
}

bitflags! {
    /// `Interrupt_A_Ack` bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IntAAck: u16 {
        const G0_GATE = 1 << 15;
        const G0_TC = 1 << 14;
        const AI_ERROR = 1 << 13;
        const AI_STOP = 1 << 12;
        const AI_START = 1 << 11;
        const AI_START2 = 1 << 10;
        const AI_START1 = 1 << 9;
        const AI_SC_TC = 1 << 8;
        const AI_SC_TC_ERROR_CONFIRM = 1 << 7;
        const G0_TC_ERROR_CONFIRM = 1 << 6;
        const G0_GATE_ERROR_CONFIRM = 1 << 5;
    }
}

bitflags! {
    /// `Interrupt_B_Ack` bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IntBAck: u16 {
        const G1_GATE = 1 << 15;
        const G1_TC = 1 << 14;
        const AO_ERROR = 1 << 13;
        const AO_STOP = 1 << 12;
        const AO_START = 1 << 11;
        const AO_UPDATE = 1 << 10;
        const AO_START1 = 1 << 9;
        const AO_BC_TC = 1 << 8;
        const AO_UC_TC = 1 << 7;
        const AO_UI2_TC = 1 << 6;
        const AO_UI2_TC_ERROR_CONFIRM = 1 << 5;
        const AO_BC_TC_ERROR_CONFIRM = 1 << 4;
        const AO_BC_TC_TRIGGER_ERROR_CONFIRM = 1 << 3;
        const G1_TC_ERROR_CONFIRM = 1 << 2;
        const G1_GATE_ERROR_CONFIRM = 1 << 1;
    }
}

bitflags! {
    /// `Interrupt_A_Enable` bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IntAEnable: u16 {
        const AI_SC_TC = 1 << 0;
        const AI_START1 = 1 << 1;
        const AI_START2 = 1 << 2;
        const AI_START = 1 << 3;
        const AI_STOP = 1 << 4;
        const AI_ERROR = 1 << 5;
        const G0_TC = 1 << 6;
        const AI_FIFO = 1 << 7;
        const G0_GATE = 1 << 8;
    }
}

bitflags! {
    /// `Interrupt_B_Enable` bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IntBEnable: u16 {
        const AO_BC_TC = 1 << 0;
        const AO_START1 = 1 << 1;
        const AO_UPDATE = 1 << 2;
        const AO_START = 1 << 3;
        const AO_STOP = 1 << 4;
        const AO_ERROR = 1 << 5;
        const AO_UC_TC = 1 << 6;
        const AO_UI2_TC = 1 << 7;
        const AO_FIFO = 1 << 8;
        const G1_TC = 1 << 9;
        const G1_GATE = 1 << 10;
    }
}

bitflags! {
    /// `AI_Status_1`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AiStatus1: u16 {
        const INTERRUPT_A = 0x8000;
        const FIFO_FULL = 0x4000;
        const FIFO_HALF_FULL = 0x2000;
        const FIFO_EMPTY = 0x1000;
        const OVERRUN = 0x0800;
        const OVERFLOW = 0x0400;
        const SC_TC_ERROR = 0x0200;
        const START2 = 0x0100;
        const START1 = 0x0080;
        const SC_TC = 0x0040;
        const START = 0x0020;
        const STOP = 0x0010;
        const G0_TC = 0x0008;
        const G0_GATE_INTERRUPT = 0x0004;
        const FIFO_REQUEST = 0x0002;
        const PASS_THRU_0_INTERRUPT = 0x0001;
    }
}

impl AiStatus1 {
    /// Conditions that end or disturb an acquisition and need attention
    /// before routine FIFO service.
    pub const UNCOMMON: Self = Self::OVERRUN
        .union(Self::OVERFLOW)
        .union(Self::SC_TC_ERROR)
        .union(Self::SC_TC)
        .union(Self::START1);

    /// Conditions that lose sample framing.
    pub const ERRORS: Self = Self::OVERRUN
        .union(Self::OVERFLOW)
        .union(Self::SC_TC_ERROR);
}

bitflags! {
    /// `AO_Status_1`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AoStatus1: u16 {
        const INTERRUPT_B = 1 << 15;
        const FIFO_FULL = 1 << 14;
        const FIFO_HALF_FULL = 1 << 13;
        const FIFO_EMPTY = 1 << 12;
        const BC_TC_ERROR = 1 << 11;
        const START = 1 << 10;
        const OVERRUN = 1 << 9;
        const START1 = 1 << 8;
        const BC_TC = 1 << 7;
        const UC_TC = 1 << 6;
        const UPDATE = 1 << 5;
        const UI2_TC = 1 << 4;
        const G1_TC = 1 << 3;
        const G1_GATE_INTERRUPT = 1 << 2;
        const FIFO_REQUEST = 1 << 1;
        const PASS_THRU_1_INTERRUPT = 1 << 0;
    }
}

fn write_flag_names<T: bitflags::Flags>(f: &mut fmt::Formatter<'_>, flags: &T) -> fmt::Result {
    let mut first = true;
    for (name, _) in flags.iter_names() {
        if !first {
            f.write_str(" ")?;
        }
        f.write_str(name)?;
        first = false;
    }
    if first {
        f.write_str("-")?;
    }
    Ok(())
}

impl fmt::Display for AiStatus1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A 0x{:04x} ", self.bits())?;
        write_flag_names(f, self)
    }
}

impl fmt::Display for AoStatus1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B 0x{:04x} ", self.bits())?;
        write_flag_names(f, self)
    }
}

/// MITE channel status (`CHSR`).
pub mod mite {
    use bitflags::bitflags;

    bitflags! {
        /// Channel status register bits.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct Chsr: u32 {
            const INT = 1 << 31;
            const DONE = 1 << 25;
            const MRDY = 1 << 23;
            const DRDY = 1 << 21;
            const LINKC = 1 << 19;
            const ERROR = 1 << 15;
            const SABORT = 1 << 14;
            const XFERR = 1 << 9;
            const DRQ1 = 1 << 7;
            const DRQ0 = 1 << 6;
            const LXERR = 3 << 4;
        }
    }

    impl Chsr {
        /// Any bit the handler does not know how to service.
        pub fn unknown(self) -> bool {
            let known = Self::INT
                | Self::LINKC
                | Self::DONE
                | Self::MRDY
                | Self::DRDY
                | Self::DRQ1
                | Self::DRQ0
                | Self::ERROR
                | Self::SABORT
                | Self::XFERR
                | Self::LXERR;
            self.bits() & !known.bits() != 0
        }

        /// Transfer errors reported by the channel.
        pub fn failed(self) -> bool {
            self.intersects(Self::ERROR | Self::SABORT | Self::XFERR | Self::LXERR)
        }
    }
}

/// DMA select bits of a MITE channel in the STC select registers.
///
/// Channels 0..=2 select themselves; 4 and 5 use paired encodings. Any
/// other channel cannot be routed.
pub fn dma_channel_select_bits(channel: usize) -> Option<u8> {
    match channel {
        0..=2 => Some(1 << channel),
        4 => Some(0x3),
        5 => Some(0x5),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_m_series_offsets_share_read_write_numbers() {
        assert_eq!(m_series_offset(stc::AI_STATUS_1), Some(0x104));
        assert_eq!(m_series_offset(stc::INTERRUPT_A_ACK), Some(0x104));
        assert_eq!(m_series_offset32(stc::G0_SAVE), Some(0x118));
        assert_eq!(m_series_offset(stc::DIO_CONTROL), None);
        assert_eq!(m_series_offset(stc::SECOND_IRQ_A_ENABLE), None);
    }

    #[test]
    fn test_status_display_names_bits() {
        let s = AiStatus1::INTERRUPT_A | AiStatus1::OVERRUN;
        let text = s.to_string();
        assert!(text.starts_with("A 0x8800"));
        assert!(text.contains("OVERRUN"));
        assert_eq!(AoStatus1::empty().to_string(), "B 0x0000 -");
    }

    #[test]
    fn test_chsr_unknown_bits() {
        assert!(!(mite::Chsr::INT | mite::Chsr::LINKC).unknown());
        assert!(mite::Chsr::from_bits_retain(1 << 2).unknown());
        assert!(mite::Chsr::XFERR.failed());
    }

    #[test]
    fn test_dma_select_bits() {
        assert_eq!(dma_channel_select_bits(1), Some(0x2));
        assert_eq!(dma_channel_select_bits(4), Some(0x3));
        assert_eq!(dma_channel_select_bits(3), None);
    }
}
