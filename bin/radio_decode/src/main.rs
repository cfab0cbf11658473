use std::collections::HashSet;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;

use basic_radio::basic_radio::BasicRadio;
use dab_core::dab_parameters::get_dab_decoder_parameters;
use dab_core::dab_transmission_modes::DabTransmissionMode;
use dab_radio::database::dab_database::DabDatabase;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct AppArguments {
    /// DAB transmission mode. Valid modes are \[1,2,3,4\]
    #[arg(short, long, default_value_t = 1)]
    mode: u32,
    /// Input filepath with demodulated soft bits. If not provided uses stdin by default.
    #[arg(short, long)]
    input_filepath: Option<String>,
    /// Only decode this subchannel instead of every DAB+ subchannel.
    #[arg(short, long)]
    subchannel: Option<u8>,
    /// Directory that received slideshow images are written into.
    #[arg(short = 'o', long)]
    slideshow_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = AppArguments::parse();
    let transmission_mode = match args.mode {
        1 => DabTransmissionMode::I,
        2 => DabTransmissionMode::II,
        3 => DabTransmissionMode::III,
        4 => DabTransmissionMode::IV,
        mode => bail!("Invalid transmission mode index {}", mode),
    };
    let mut input_file: Box<dyn Read> = match &args.input_filepath {
        None => Box::new(std::io::stdin()),
        Some(filepath) => {
            let file = std::fs::File::open(filepath)
                .with_context(|| format!("Failed to open input file {}", filepath))?;
            Box::new(file)
        },
    };
    if let Some(slideshow_dir) = &args.slideshow_dir {
        std::fs::create_dir_all(slideshow_dir)
            .with_context(|| format!("Failed to create slideshow directory {}", slideshow_dir.display()))?;
    }

    let params = get_dab_decoder_parameters(transmission_mode);
    // Decoding runs without an audio codec binding: data services, labels
    // and slideshows are surfaced, access units are counted.
    let mut radio = BasicRadio::new(params, None);
    radio.subscribe_ensemble_update(|database| print_ensemble(database));

    let mut subscribed_channels = HashSet::<u8>::new();
    let mut frame_bytes = vec![0u8; params.nb_bits_per_frame];
    let mut total_frames = 0u64;

    loop {
        if let Err(err) = input_file.read_exact(&mut frame_bytes) {
            info!("finished reading after {} frames ({})", total_frames, err);
            break;
        }
        total_frames += 1;
        let soft_bits = unsafe {
            std::slice::from_raw_parts(frame_bytes.as_ptr() as *const i8, frame_bytes.len())
        };
        radio.process_fic(&soft_bits[..params.nb_bits_in_fic]);
        attach_new_channels(&mut radio, &args, &mut subscribed_channels);
        radio.process_msc(&soft_bits[params.nb_bits_in_fic..]);
    }

    let statistics = radio.get_fic_statistics();
    info!("fibs decoded {}/{}", statistics.nb_fibs_valid, statistics.nb_fibs_total);
    info!("frames dropped {}", radio.get_nb_dropped_frames());
    radio.stop();
    Ok(())
}

fn attach_new_channels(radio: &mut BasicRadio, args: &AppArguments, subscribed_channels: &mut HashSet<u8>) {
    for subchannel_id in radio.get_channel_ids() {
        if let Some(selected) = args.subchannel {
            if selected != subchannel_id {
                continue;
            }
        }
        if !subscribed_channels.insert(subchannel_id) {
            continue;
        }

        let channel = radio.get_channel(subchannel_id).expect("Channel id was just listed");
        let channel = channel.lock();
        channel.update_controls(|controls| controls.set_is_decode_data(true));

        channel.subscribe_dynamic_label(move |label| {
            info!("[subchannel-{}] dynamic label: {}", subchannel_id, label);
        });
        let slideshow_dir = args.slideshow_dir.clone();
        channel.subscribe_slideshow(move |slideshow| {
            info!("[subchannel-{}] slideshow {} ({} bytes)", subchannel_id, slideshow.name, slideshow.image_data.len());
            if let Some(slideshow_dir) = &slideshow_dir {
                let filename = format!("{}-{}", slideshow.transport_id, slideshow.name);
                let filepath = slideshow_dir.join(filename);
                if let Err(err) = std::fs::write(&filepath, &slideshow.image_data) {
                    log::error!("failed to write {}: {}", filepath.display(), err);
                }
            }
        });
        channel.subscribe_mot_entity(move |entity| {
            info!(
                "[subchannel-{}] mot entity transport_id={} type={}/{} {} bytes",
                subchannel_id, entity.transport_id,
                entity.header.content_type, entity.header.content_subtype,
                entity.body.len(),
            );
        });
    }
}

fn print_ensemble(database: &DabDatabase) {
    let ensemble = &database.ensemble;
    info!(
        "ensemble country_id={} reference={} label={:?} services={}",
        ensemble.id.country_id, ensemble.id.ensemble_reference,
        ensemble.label, database.get_services().len(),
    );
    for service in database.get_services() {
        info!("  service ref={:#X} label={:?}", service.id.service_reference, service.label);
        for component in database.get_service_components(&service.id) {
            info!(
                "    component {} subchannel={} type={} slideshow={}",
                component.component_id, component.subchannel_id,
                component.service_type, component.is_slideshow(),
            );
        }
    }
    for subchannel in database.get_subchannels() {
        info!(
            "  subchannel {} start={} size={} CU",
            subchannel.id, subchannel.start_address, subchannel.length_cu,
        );
    }
}
