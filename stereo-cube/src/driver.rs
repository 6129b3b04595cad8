//! Startup and lifecycle
//!
//! `configure` walks the parsed command line: `-w` and `-r` pick the entries,
//! the first other option constructs both, and every option is offered to
//! the winsys, then the renderer. `Session::run` connects the pair and hands
//! control to the winsys loop.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cli::{CliEvent, OptionGrammar, UsageError};
use crate::config::Settings;
use crate::quit::QuitToken;
use crate::registry::Registry;
use crate::renderer::{Renderer, RendererDescriptor};
use crate::winsys::{FrameCallbacks, Winsys, WinsysDescriptor};

/// What the command line asked for
pub enum Outcome {
    Help,
    List,
    Run(Session),
}

/// A constructed winsys and renderer pair
///
/// The renderer is dropped before the winsys whose context it draws with.
pub struct Session {
    renderer: Box<dyn Renderer>,
    winsys: Box<dyn Winsys>,
    names: (&'static str, &'static str),
}

pub struct Driver<'a> {
    winsyses: &'a Registry<WinsysDescriptor>,
    renderers: &'a Registry<RendererDescriptor>,
    settings: &'a Settings,
}

impl<'a> Driver<'a> {
    pub fn new(
        winsyses: &'a Registry<WinsysDescriptor>,
        renderers: &'a Registry<RendererDescriptor>,
        settings: &'a Settings,
    ) -> Self {
        Self {
            winsyses,
            renderers,
            settings,
        }
    }

    /// Merged option grammar, with conflicting letters reported
    pub fn grammar(&self) -> OptionGrammar {
        let grammar = OptionGrammar::merge(self.winsyses, self.renderers);
        for conflict in &grammar.conflicts {
            match conflict.kept {
                Some(kept) => warn!(
                    "Option -{} of {} is shadowed by {}",
                    conflict.short, conflict.dropped, kept
                ),
                None => warn!(
                    "Option -{} of {} collides with a base option and is ignored",
                    conflict.short, conflict.dropped
                ),
            }
        }
        grammar
    }

    fn resolve_winsys(&self, selected: Option<&'static WinsysDescriptor>) -> Result<&'static WinsysDescriptor> {
        if let Some(descriptor) = selected {
            return Ok(descriptor);
        }
        match &self.settings.winsys {
            Some(name) => Ok(self
                .winsyses
                .select(name)
                .ok_or_else(|| UsageError::UnknownWinsys(name.clone()))?),
            None => Ok(self.winsyses.first().ok_or(UsageError::NoWinsys)?),
        }
    }

    fn resolve_renderer(
        &self,
        selected: Option<&'static RendererDescriptor>,
    ) -> Result<&'static RendererDescriptor> {
        if let Some(descriptor) = selected {
            return Ok(descriptor);
        }
        match &self.settings.renderer {
            Some(name) => Ok(self
                .renderers
                .select(name)
                .ok_or_else(|| UsageError::UnknownRenderer(name.clone()))?),
            None => Ok(self.renderers.first().ok_or(UsageError::NoRenderer)?),
        }
    }

    fn construct(
        &self,
        winsys: Option<&'static WinsysDescriptor>,
        renderer: Option<&'static RendererDescriptor>,
    ) -> Result<Session> {
        let winsys = self.resolve_winsys(winsys)?;
        let renderer = self.resolve_renderer(renderer)?;
        info!("Using winsys {} with renderer {}", winsys.name, renderer.name);
        Ok(Session {
            winsys: (winsys.new)(self.settings),
            renderer: (renderer.new)(self.settings),
            names: (winsys.name, renderer.name),
        })
    }

    /// Apply the command line, constructing the pair on first use
    pub fn configure(&self, events: Vec<CliEvent>) -> Result<Outcome> {
        let mut winsys = None;
        let mut renderer = None;
        let mut session: Option<Session> = None;

        for event in events {
            match event {
                CliEvent::Help => return Ok(Outcome::Help),
                CliEvent::List => return Ok(Outcome::List),
                CliEvent::Winsys(name) => {
                    if session.is_some() {
                        return Err(UsageError::WinsysAfterOptions.into());
                    }
                    winsys = Some(self.winsyses.select(&name).ok_or(UsageError::UnknownWinsys(name))?);
                }
                CliEvent::Renderer(name) => {
                    if session.is_some() {
                        return Err(UsageError::RendererAfterOptions.into());
                    }
                    renderer = Some(
                        self.renderers
                            .select(&name)
                            .ok_or(UsageError::UnknownRenderer(name))?,
                    );
                }
                CliEvent::Option(opt, value) => {
                    if session.is_none() {
                        session = Some(self.construct(winsys, renderer)?);
                    }
                    if let Some(current) = session.as_mut() {
                        current.handle_option(opt, &value)?;
                    }
                }
            }
        }

        let session = match session {
            Some(session) => session,
            None => self.construct(winsys, renderer)?,
        };
        Ok(Outcome::Run(session))
    }
}

impl Session {
    /// Offer an option to the winsys, then the renderer
    fn handle_option(&mut self, opt: char, value: &str) -> Result<()> {
        if self.winsys.handle_option(opt, value)? {
            debug!("-{} handled by {}", opt, self.names.0);
            return Ok(());
        }
        if self.renderer.handle_option(opt, value)? {
            debug!("-{} handled by {}", opt, self.names.1);
            return Ok(());
        }
        Err(UsageError::UnhandledOption(opt).into())
    }

    /// Connect both halves and run until `quit`
    pub fn run(mut self, quit: &QuitToken) -> Result<()> {
        let target = self
            .winsys
            .connect()
            .with_context(|| format!("Failed to connect {} winsys", self.names.0))?;
        info!("Connected {} winsys ({:?})", self.names.0, target.eyes);

        self.renderer
            .connect(&target)
            .with_context(|| format!("Failed to set up {} renderer", self.names.1))?;

        let mut scene = Scene {
            renderer: self.renderer.as_mut(),
            frame: 0,
        };
        self.winsys.main_loop(&mut scene, quit)?;

        info!("Stopped after {} frames", scene.frame);
        Ok(())
    }
}

/// Frame callbacks forwarding to the renderer with a running frame number
struct Scene<'a> {
    renderer: &'a mut dyn Renderer,
    frame: u64,
}

impl FrameCallbacks for Scene<'_> {
    fn update_size(&mut self, width: i32, height: i32) {
        debug!("Drawable is {}x{}", width, height);
        self.renderer.resize(width, height);
    }

    fn draw(&mut self) {
        self.renderer.draw_frame(self.frame);
        self.frame += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use anyhow::bail;

    use crate::eyes::{EyeTarget, RenderTarget, SplitLayout};
    use crate::gles::Gles;
    use crate::registry::OptionSpec;

    thread_local! {
        static LOG: RefCell<Vec<String>> = RefCell::new(Vec::new());
    }

    fn log(entry: impl Into<String>) {
        LOG.with(|log| log.borrow_mut().push(entry.into()));
    }

    fn take_log() -> Vec<String> {
        LOG.with(|log| log.borrow_mut().drain(..).collect())
    }

    const fn option(short: char, id: &'static str) -> OptionSpec {
        OptionSpec {
            short,
            id,
            value_name: "V",
            help: "",
        }
    }

    struct MockWinsys {
        name: &'static str,
        fail_connect: bool,
    }

    impl Winsys for MockWinsys {
        fn handle_option(&mut self, opt: char, value: &str) -> Result<bool> {
            if opt != 'x' {
                return Ok(false);
            }
            log(format!("{}: -x {}", self.name, value));
            Ok(true)
        }

        fn connect(&mut self) -> Result<RenderTarget> {
            log(format!("{}: connect", self.name));
            if self.fail_connect {
                bail!("no display");
            }
            Ok(RenderTarget {
                gl: Rc::new(Gles::unloaded()),
                eyes: EyeTarget::Split(SplitLayout::SideBySide),
            })
        }

        fn main_loop(&mut self, callbacks: &mut dyn FrameCallbacks, quit: &QuitToken) -> Result<()> {
            log(format!("{}: loop", self.name));
            callbacks.update_size(640, 480);
            for _ in 0..3 {
                if quit.is_requested() {
                    break;
                }
                callbacks.draw();
            }
            Ok(())
        }
    }

    impl Drop for MockWinsys {
        fn drop(&mut self) {
            log(format!("{}: drop", self.name));
        }
    }

    struct MockRenderer {
        name: &'static str,
        /// Whether this renderer understands `-y` and `-v`
        takes_options: bool,
    }

    impl Renderer for MockRenderer {
        fn handle_option(&mut self, opt: char, value: &str) -> Result<bool> {
            if !self.takes_options {
                return Ok(false);
            }
            match opt {
                'y' => {
                    log(format!("{}: -y {}", self.name, value));
                    Ok(true)
                }
                'v' => bail!("bad value {}", value),
                _ => Ok(false),
            }
        }

        fn connect(&mut self, _target: &RenderTarget) -> Result<()> {
            log(format!("{}: connect", self.name));
            Ok(())
        }

        fn draw_frame(&mut self, frame: u64) {
            log(format!("{}: draw {}", self.name, frame));
        }

        fn resize(&mut self, width: i32, height: i32) {
            log(format!("{}: resize {}x{}", self.name, width, height));
        }
    }

    impl Drop for MockRenderer {
        fn drop(&mut self) {
            log(format!("{}: drop", self.name));
        }
    }

    fn new_screen(_: &Settings) -> Box<dyn Winsys> {
        log("screen: new");
        Box::new(MockWinsys {
            name: "screen",
            fail_connect: false,
        })
    }

    fn new_broken(_: &Settings) -> Box<dyn Winsys> {
        log("broken: new");
        Box::new(MockWinsys {
            name: "broken",
            fail_connect: true,
        })
    }

    fn new_flat(_: &Settings) -> Box<dyn Renderer> {
        log("flat: new");
        Box::new(MockRenderer {
            name: "flat",
            takes_options: true,
        })
    }

    fn new_tall(_: &Settings) -> Box<dyn Renderer> {
        log("tall: new");
        Box::new(MockRenderer {
            name: "tall",
            takes_options: false,
        })
    }

    static WINSYS_ENTRIES: [WinsysDescriptor; 2] = [
        WinsysDescriptor {
            name: "screen",
            options: &[option('x', "x")],
            new: new_screen,
        },
        WinsysDescriptor {
            name: "broken",
            options: &[],
            new: new_broken,
        },
    ];

    static RENDERER_ENTRIES: [RendererDescriptor; 2] = [
        RendererDescriptor {
            name: "flat",
            options: &[option('y', "y"), option('v', "v")],
            new: new_flat,
        },
        RendererDescriptor {
            name: "tall",
            options: &[],
            new: new_tall,
        },
    ];

    static WINSYSES: Registry<WinsysDescriptor> = Registry::new(&WINSYS_ENTRIES);
    static RENDERERS: Registry<RendererDescriptor> = Registry::new(&RENDERER_ENTRIES);

    fn configure(settings: &Settings, events: Vec<CliEvent>) -> Result<Outcome> {
        take_log();
        Driver::new(&WINSYSES, &RENDERERS, settings).configure(events)
    }

    fn session(outcome: Outcome) -> Session {
        match outcome {
            Outcome::Run(session) => session,
            _ => panic!("expected a session"),
        }
    }

    fn usage_error(err: &anyhow::Error) -> &UsageError {
        err.downcast_ref::<UsageError>().expect("usage error")
    }

    #[test]
    fn test_full_lifecycle_order() {
        let settings = Settings::default();
        let outcome = configure(
            &settings,
            vec![
                CliEvent::Winsys("screen".into()),
                CliEvent::Renderer("flat".into()),
                CliEvent::Option('x', "1".into()),
                CliEvent::Option('y', "2".into()),
            ],
        )
        .unwrap();
        session(outcome).run(&QuitToken::new()).unwrap();

        assert_eq!(
            take_log(),
            [
                "screen: new",
                "flat: new",
                "screen: -x 1",
                "flat: -y 2",
                "screen: connect",
                "flat: connect",
                "screen: loop",
                "flat: resize 640x480",
                "flat: draw 0",
                "flat: draw 1",
                "flat: draw 2",
                "flat: drop",
                "screen: drop",
            ]
        );
    }

    #[test]
    fn test_quit_before_loop_draws_nothing() {
        let quit = QuitToken::new();
        quit.request();
        let outcome = configure(&Settings::default(), vec![]).unwrap();
        session(outcome).run(&quit).unwrap();

        let log = take_log();
        assert!(!log.iter().any(|e| e.contains("draw")));
        assert_eq!(log.last().map(String::as_str), Some("screen: drop"));
    }

    #[test]
    fn test_failed_connect_skips_loop() {
        let outcome = configure(&Settings::default(), vec![CliEvent::Winsys("broken".into())]).unwrap();
        let err = session(outcome).run(&QuitToken::new()).unwrap_err();
        assert!(format!("{:#}", err).contains("no display"));

        assert_eq!(
            take_log(),
            ["broken: new", "flat: new", "broken: connect", "flat: drop", "broken: drop"]
        );
    }

    #[test]
    fn test_unknown_names_fail_before_construction() {
        let err = configure(&Settings::default(), vec![CliEvent::Winsys("nope".into())])
            .err()
            .unwrap();
        assert!(matches!(usage_error(&err), UsageError::UnknownWinsys(name) if name == "nope"));

        let err = configure(&Settings::default(), vec![CliEvent::Renderer("Flat".into())])
            .err()
            .unwrap();
        assert!(matches!(usage_error(&err), UsageError::UnknownRenderer(_)));
        assert!(take_log().is_empty());
    }

    #[test]
    fn test_selection_after_options_is_rejected() {
        let err = configure(
            &Settings::default(),
            vec![CliEvent::Option('y', "1".into()), CliEvent::Renderer("tall".into())],
        )
        .err()
        .unwrap();
        assert!(matches!(usage_error(&err), UsageError::RendererAfterOptions));

        let err = configure(
            &Settings::default(),
            vec![CliEvent::Option('x', "1".into()), CliEvent::Winsys("broken".into())],
        )
        .err()
        .unwrap();
        assert!(matches!(usage_error(&err), UsageError::WinsysAfterOptions));
    }

    #[test]
    fn test_option_declined_by_both() {
        let err = configure(
            &Settings::default(),
            vec![CliEvent::Renderer("tall".into()), CliEvent::Option('y', "1".into())],
        )
        .err()
        .unwrap();
        assert!(matches!(usage_error(&err), UsageError::UnhandledOption('y')));
        assert_eq!(take_log(), ["screen: new", "tall: new", "tall: drop", "screen: drop"]);
    }

    #[test]
    fn test_renderer_option_skips_winsys() {
        let outcome = configure(&Settings::default(), vec![CliEvent::Option('y', "3".into())]).unwrap();
        drop(outcome);
        assert_eq!(
            take_log(),
            ["screen: new", "flat: new", "flat: -y 3", "flat: drop", "screen: drop"]
        );
    }

    #[test]
    fn test_option_error_propagates() {
        let err = configure(&Settings::default(), vec![CliEvent::Option('v', "7".into())])
            .err()
            .unwrap();
        assert!(err.to_string().contains("bad value 7"));
    }

    #[test]
    fn test_help_and_list_stop_the_walk() {
        let outcome = configure(
            &Settings::default(),
            vec![CliEvent::Help, CliEvent::Winsys("nope".into())],
        )
        .unwrap();
        assert!(matches!(outcome, Outcome::Help));

        let outcome = configure(&Settings::default(), vec![CliEvent::List]).unwrap();
        assert!(matches!(outcome, Outcome::List));
        assert!(take_log().is_empty());
    }

    #[test]
    fn test_defaults_come_from_settings_then_first_entry() {
        let outcome = configure(&Settings::default(), vec![]).unwrap();
        assert_eq!(session(outcome).names, ("screen", "flat"));

        let settings = Settings {
            winsys: Some("broken".into()),
            renderer: Some("tall".into()),
            ..Settings::default()
        };
        let outcome = configure(&settings, vec![]).unwrap();
        assert_eq!(session(outcome).names, ("broken", "tall"));

        // The command line wins over the file
        let outcome = configure(&settings, vec![CliEvent::Renderer("flat".into())]).unwrap();
        assert_eq!(session(outcome).names, ("broken", "flat"));
    }

    #[test]
    fn test_unknown_default_in_settings() {
        let settings = Settings {
            renderer: Some("cube".into()),
            ..Settings::default()
        };
        let err = configure(&settings, vec![]).err().unwrap();
        assert!(matches!(usage_error(&err), UsageError::UnknownRenderer(name) if name == "cube"));
    }

    #[test]
    fn test_builtin_grammar_has_no_conflicts() {
        let settings = Settings::default();
        let driver = Driver::new(&crate::winsys::WINSYSES, &crate::renderer::RENDERERS, &settings);
        assert!(driver.grammar().conflicts.is_empty());
    }
}
