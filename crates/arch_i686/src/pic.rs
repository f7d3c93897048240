use crate::port::{io_wait, Port};

const CMD_INIT: u8 = 0x11;
const CMD_END_OF_INTERRUPT: u8 = 0x20;
const MODE_8086: u8 = 0x01;

struct Pic {
    offset: u8,
    command: Port,
    data: Port,
}

impl Pic {
    fn handles_interrupt(&self, vector: u8) -> bool {
        (self.offset..self.offset + 8).contains(&vector)
    }

    unsafe fn end_of_interrupt(&mut self) {
        self.command.write(CMD_END_OF_INTERRUPT);
    }

    unsafe fn read_mask(&mut self) -> u8 {
        self.data.read()
    }

    unsafe fn write_mask(&mut self, mask: u8) {
        self.data.write(mask);
    }
}

/// The primary/secondary 8259 pair found on every PC.
pub struct ChainedPics {
    pics: [Pic; 2],
}

impl ChainedPics {
    pub const fn new(primary_offset: u8, secondary_offset: u8) -> Self {
        Self {
            pics: [
                Pic {
                    offset: primary_offset,
                    command: Port::new(0x20),
                    data: Port::new(0x21),
                },
                Pic {
                    offset: secondary_offset,
                    command: Port::new(0xA0),
                    data: Port::new(0xA1),
                },
            ],
        }
    }

    /// Remaps both controllers to their offsets with every line masked.
    ///
    /// # Safety
    /// Must run with interrupts disabled.
    pub unsafe fn initialize(&mut self) {
        let [primary, secondary] = &mut self.pics;
        primary.command.write(CMD_INIT);
        io_wait();
        secondary.command.write(CMD_INIT);
        io_wait();
        primary.data.write(primary.offset);
        io_wait();
        secondary.data.write(secondary.offset);
        io_wait();
        // Secondary hangs off line 2 of the primary.
        primary.data.write(4);
        io_wait();
        secondary.data.write(2);
        io_wait();
        primary.data.write(MODE_8086);
        io_wait();
        secondary.data.write(MODE_8086);
        io_wait();

        primary.write_mask(0xFF);
        secondary.write_mask(0xFF);
    }

    /// Unmasks one IRQ line (0..16). Lines on the secondary also open the
    /// cascade line.
    ///
    /// # Safety
    /// The line's handler must already be installed.
    pub unsafe fn enable_irq(&mut self, irq: u8) {
        let [primary, secondary] = &mut self.pics;
        if irq < 8 {
            let mask = primary.read_mask();
            primary.write_mask(mask & !(1 << irq));
        } else {
            let mask = secondary.read_mask();
            secondary.write_mask(mask & !(1 << (irq - 8)));
            let mask = primary.read_mask();
            primary.write_mask(mask & !(1 << 2));
        }
    }

    /// # Safety
    /// Masking a line drops its interrupts until re-enabled.
    pub unsafe fn disable_irq(&mut self, irq: u8) {
        let [primary, secondary] = &mut self.pics;
        if irq < 8 {
            let mask = primary.read_mask();
            primary.write_mask(mask | (1 << irq));
        } else {
            let mask = secondary.read_mask();
            secondary.write_mask(mask | (1 << (irq - 8)));
        }
    }

    pub fn handles_interrupt(&self, vector: u8) -> bool {
        self.pics.iter().any(|pic| pic.handles_interrupt(vector))
    }

    /// Acknowledges the interrupt delivered on `vector`.
    ///
    /// # Safety
    /// Acknowledging a vector the PICs did not raise loses a pending IRQ.
    pub unsafe fn notify_end_of_interrupt(&mut self, vector: u8) {
        if !self.handles_interrupt(vector) {
            return;
        }
        let [primary, secondary] = &mut self.pics;
        if secondary.handles_interrupt(vector) {
            secondary.end_of_interrupt();
        }
        primary.end_of_interrupt();
    }
}
