// Note: Game BoyTM, Game Boy PocketTM, Super Game BoyTM and Game Boy ColorTM are registered trademarks of
// Nintendo CO., LTD. © 1989 to 1999 by Nintendo CO., LTD.

#[cfg(feature = "gui")]
fn main() {
    use gbcore::config::Config;
    use gbcore::convention::Term;
    use gbcore::gpu::{SCREEN_H, SCREEN_W};
    use gbcore::joypad::JoypadKey;
    use gbcore::motherboard::MotherBoard;

    env_logger::init();

    let config = Config::parse();
    let boot_rom = config.boot_rom.as_ref().map(|p| std::fs::read(p).expect("failed to read boot rom"));
    let mut mbrd = MotherBoard::power_up_with_boot_rom(Term::GBC, &config.rom, boot_rom);

    if config.audio {
        let device = cpal::default_output_device().expect("no audio output device available");
        log::debug!("opening audio device: {}", device.name());
        let format = device.default_output_format().unwrap();
        let format = cpal::Format { channels: 2, sample_rate: format.sample_rate, data_type: cpal::SampleFormat::F32 };

        let event_loop = cpal::EventLoop::new();
        let stream_id = event_loop.build_output_stream(&device, &format).unwrap();
        event_loop.play_stream(stream_id);

        let apu_data = mbrd.mmu.apu.buffer.clone();
        std::thread::spawn(move || {
            event_loop.run(move |_, stream_data| {
                let mut apu_data = apu_data.lock().unwrap();
                if let cpal::StreamData::Output { buffer } = stream_data {
                    let len = std::cmp::min(buffer.len() / 2, apu_data.len());
                    match buffer {
                        cpal::UnknownTypeOutputBuffer::F32(mut buffer) => {
                            for (i, (data_l, data_r)) in apu_data.drain(..len).enumerate() {
                                buffer[i * 2] = data_l;
                                buffer[i * 2 + 1] = data_r;
                            }
                        }
                        cpal::UnknownTypeOutputBuffer::U16(mut buffer) => {
                            for (i, (data_l, data_r)) in apu_data.drain(..len).enumerate() {
                                buffer[i * 2] =
                                    (data_l * f32::from(std::i16::MAX) + f32::from(std::u16::MAX) / 2.0) as u16;
                                buffer[i * 2 + 1] =
                                    (data_r * f32::from(std::i16::MAX) + f32::from(std::u16::MAX) / 2.0) as u16;
                            }
                        }
                        cpal::UnknownTypeOutputBuffer::I16(mut buffer) => {
                            for (i, (data_l, data_r)) in apu_data.drain(..len).enumerate() {
                                buffer[i * 2] = (data_l * f32::from(std::i16::MAX)) as i16;
                                buffer[i * 2 + 1] = (data_r * f32::from(std::i16::MAX)) as i16;
                            }
                        }
                    }
                }
            });
        });
    }

    let mut option = minifb::WindowOptions::default();
    option.resize = true;
    option.scale = match config.scale {
        1 => minifb::Scale::X1,
        2 => minifb::Scale::X2,
        4 => minifb::Scale::X4,
        8 => minifb::Scale::X8,
        n => {
            log::warn!("unsupported scale factor {}, falling back to 2", n);
            minifb::Scale::X2
        }
    };
    let rom_name = mbrd.romname();
    let mut window =
        minifb::Window::new(format!("gbcore - {}", rom_name).as_str(), SCREEN_W, SCREEN_H, option).unwrap();
    let mut window_buffer = vec![0x00; SCREEN_W * SCREEN_H];
    window.update_with_buffer(window_buffer.as_slice()).unwrap();

    let keymap = [
        (minifb::Key::Right, JoypadKey::Right),
        (minifb::Key::Up, JoypadKey::Up),
        (minifb::Key::Left, JoypadKey::Left),
        (minifb::Key::Down, JoypadKey::Down),
        (minifb::Key::Z, JoypadKey::A),
        (minifb::Key::X, JoypadKey::B),
        (minifb::Key::Space, JoypadKey::Select),
        (minifb::Key::Enter, JoypadKey::Start),
    ];

    while window.is_open() && !window.is_key_down(minifb::Key::Escape) {
        mbrd.step_frame();

        let mut i: usize = 0;
        for l in mbrd.mmu.gpu.data.iter() {
            for w in l.iter() {
                let b = u32::from(w[0]) << 16;
                let g = u32::from(w[1]) << 8;
                let r = u32::from(w[2]);
                let a = 0xff00_0000;
                window_buffer[i] = a | b | g | r;
                i += 1;
            }
        }
        window.update_with_buffer(window_buffer.as_slice()).unwrap();

        for (rk, vk) in &keymap {
            if window.is_key_down(*rk) {
                mbrd.keydown(vk.clone());
            } else {
                mbrd.keyup(vk.clone());
            }
        }
    }
    mbrd.mmu.cartridge.sav();
}

#[cfg(feature = "tty")]
fn main() {
    use gbcore::config::Config;
    use gbcore::convention::Term;
    use gbcore::gpu::{SCREEN_H, SCREEN_W};
    use gbcore::joypad::JoypadKey;
    use gbcore::motherboard::MotherBoard;

    env_logger::init();

    let config = Config::parse();
    let mut mbrd = MotherBoard::power_up(Term::GB, &config.rom);
    let mut window_buffer = vec![0x00; SCREEN_W * SCREEN_H];

    if !blockish::current_terminal_is_supported() {
        log::error!("terminal is not supported");
        std::process::exit(1);
    }
    let mut term_width = SCREEN_W as u32;
    let mut term_height = SCREEN_H as u32;
    crossterm_input::RawScreen::into_raw_mode().unwrap();
    let input = crossterm_input::input();
    let mut reader = input.read_async();
    if let Ok(res) = crossterm::terminal::size() {
        term_width = res.0 as u32 * 8;
        term_height = res.1 as u32 * 8 * 2;
    }
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen).unwrap();

    let keymap = [
        (crossterm_input::KeyEvent::Right, JoypadKey::Right),
        (crossterm_input::KeyEvent::Up, JoypadKey::Up),
        (crossterm_input::KeyEvent::Left, JoypadKey::Left),
        (crossterm_input::KeyEvent::Down, JoypadKey::Down),
        (crossterm_input::KeyEvent::Char('z'), JoypadKey::A),
        (crossterm_input::KeyEvent::Char('x'), JoypadKey::B),
        (crossterm_input::KeyEvent::Char(' '), JoypadKey::Select),
        (crossterm_input::KeyEvent::Enter, JoypadKey::Start),
    ];

    loop {
        mbrd.step_frame();

        let mut i: usize = 0;
        for l in mbrd.mmu.gpu.data.iter() {
            for w in l.iter() {
                let b = u32::from(w[0]) << 16;
                let g = u32::from(w[1]) << 8;
                let r = u32::from(w[2]);
                let a = 0xff00_0000;
                window_buffer[i] = a | b | g | r;
                i += 1;
            }
        }
        let original_width = SCREEN_W as u32;
        let original_height = SCREEN_H as u32;

        let _ = crossterm::execute!(std::io::stdout(), crossterm::cursor::MoveTo(0, 0));
        blockish::render_write_eol(
            term_width,
            term_height,
            &|x, y| {
                let start =
                    (y * original_height / term_height * original_width + (x * original_width / term_width)) as usize;
                let pixel = window_buffer[start];
                ((pixel >> 16 & 0xff) as u8, (pixel >> 8 & 0xff) as u8, (pixel & 0xff) as u8)
            },
            false,
        );

        let option_event = reader.next();
        if Some(crossterm_input::InputEvent::Keyboard(crossterm_input::KeyEvent::Esc)) == option_event {
            break;
        }
        for (rk, vk) in &keymap {
            if Some(crossterm_input::InputEvent::Keyboard(rk.clone())) == option_event {
                mbrd.keydown(vk.clone());
            } else {
                mbrd.keyup(vk.clone());
            }
        }
    }
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen).unwrap();
    mbrd.mmu.cartridge.sav();
}
