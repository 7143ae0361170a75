use anyhow::{anyhow, Context as _, Result};
use owo_colors::OwoColorize;
use pad::PadStr;
use revolver::config::Config;
use revolver::euicc::command::ISD_R_AID;
use revolver::euicc::{Euicc, NotificationEvent};
use revolver::pcsc::PcscReader;
use revolver::service::Reader;
use tap::TapFallible;
use tracing::{error, trace_span};

fn open<R: Reader>(config: &Config, reader: &mut R) -> Result<Euicc<R::Channel>> {
    let channel = reader
        .open_channel(&ISD_R_AID)
        .with_context(|| format!("Couldn't open a channel on {}", reader.name()))?;
    let mut euicc = Euicc::new(channel).with_max_continuations(config.max_continuations);
    let eid = euicc
        .eid()?
        .map_or_else(|| "unknown".to_owned(), hex::encode_upper);
    println!("┏╸{}╺ EID {}", reader.name().italic(), eid.cyan());
    Ok(euicc)
}

/// Runs `f` for every reader, reporting failures without stopping. Only fails if
/// every reader did.
fn each_reader<R, F>(config: &Config, readers: Vec<R>, mut f: F) -> Result<()>
where
    R: Reader,
    F: FnMut(&mut Euicc<R::Channel>) -> Result<()>,
{
    let total = readers.len();
    let mut failures = 0;
    for mut reader in readers {
        let span = trace_span!("reader", name = reader.name());
        let _enter = span.enter();

        let _ = open(config, &mut reader)
            .and_then(|mut euicc| f(&mut euicc))
            .tap_err(|err| {
                failures += 1;
                error!(?err, "Failed");
                println!("┗╸{} {}", "✗".red(), format!("{:#}", err).red());
            });
    }
    if total > 0 && failures == total {
        return Err(anyhow!("All {} reader(s) failed", total));
    }
    Ok(())
}

pub fn profiles(config: &Config, readers: Vec<PcscReader>) -> Result<()> {
    each_reader(config, readers, |euicc| {
        let profiles = euicc.profiles()?;
        if profiles.is_empty() {
            println!("┗╸{}", "no profiles".dimmed());
        }
        for (i, profile) in profiles.iter().enumerate() {
            let branch = if i + 1 == profiles.len() { "┗" } else { "┠" };
            let iccid = profile.iccid.to_string().pad_to_width(20);
            if profile.enabled {
                println!("{}╴{} {}", branch, iccid.green(), "enabled".green());
            } else {
                println!("{}╴{} {}", branch, iccid, "disabled".dimmed());
            }
        }
        Ok(())
    })
}

pub fn notifications(config: &Config, readers: Vec<PcscReader>) -> Result<()> {
    each_reader(config, readers, |euicc| {
        let notifications = euicc.notifications()?;
        if notifications.is_empty() {
            println!("┗╸{}", "no notifications".dimmed());
        }
        for (i, n) in notifications.iter().enumerate() {
            let branch = if i + 1 == notifications.len() { "┗" } else { "┠" };
            let event = match n.event() {
                NotificationEvent::Other(code) => format!("event {}", hex::encode_upper(code)),
                event => format!("{:?}", event),
            };
            let line = format!(
                "#{} {} {} → {}",
                hex::encode_upper(&n.sequence_number).pad_to_width(4),
                event.pad_to_width(10),
                n.iccid,
                n.smdp_address,
            );
            if n.event().is_consumed() {
                println!("{}╴{} {}", branch, line, "(cleared on rotation)".yellow());
            } else {
                println!("{}╴{}", branch, line);
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use revolver::transceiver::Channel;

    /// Answers every command with the same response.
    struct Fixed(&'static str);

    impl Channel for Fixed {
        fn transmit(&mut self, _command: &[u8]) -> revolver::Result<Vec<u8>> {
            Ok(hex::decode(self.0).unwrap())
        }
    }

    struct FakeReader(Option<&'static str>);

    impl Reader for FakeReader {
        type Channel = Fixed;

        fn name(&self) -> &str {
            "SIM"
        }

        fn open_channel(&mut self, _aid: &[u8]) -> revolver::Result<Fixed> {
            self.0
                .map(Fixed)
                .ok_or_else(|| revolver::Error::ChannelUnavailable("denied".into()))
        }
    }

    const EID_RSP: &str = "bf3e125a10890490321234512345123456789012359000";

    #[test]
    fn every_reader_failing_is_an_error() {
        let readers = vec![FakeReader(None), FakeReader(Some("6d00"))];
        assert!(each_reader(&Config::default(), readers, |_| Ok(())).is_err());
    }

    #[test]
    fn one_reader_working_is_enough() {
        let readers = vec![FakeReader(None), FakeReader(Some(EID_RSP))];
        let mut visited = 0;
        each_reader(&Config::default(), readers, |_| {
            visited += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(visited, 1);
    }

    #[test]
    fn no_readers_is_fine() {
        assert!(each_reader::<FakeReader, _>(&Config::default(), vec![], |_| Ok(())).is_ok());
    }
}
