use aura_daemon::classifier::Category;
use aura_daemon::safety::{ConsentLevel, SafetyManager};
use aura_daemon::scanner::ProcessRecord;

fn process(pid: u32, name: &str, category: Category) -> ProcessRecord {
    ProcessRecord {
        pid,
        name: name.to_string(),
        category,
        ..Default::default()
    }
}

fn manager(level: i64) -> SafetyManager {
    SafetyManager::new(["sshd"], ["systemd", "kthreadd"], level)
}

#[test]
fn test_pid_one_always_denied() {
    let empty: Vec<String> = Vec::new();
    let safety = SafetyManager::new(empty.clone(), empty, 0);
    let verdict = safety.validate_termination(&process(1, "anything", Category::User));
    assert!(!verdict.allowed);
    assert!(verdict.reason.contains("critical"));
}

#[test]
fn test_kernel_category_denied() {
    let verdict = manager(0).validate_termination(&process(300, "kworker/1:0", Category::Kernel));
    assert!(!verdict.allowed);
    assert!(verdict.reason.contains("kernel"));
}

#[test]
fn test_never_terminate_denied_without_protection() {
    let safety = manager(0);
    let p = process(400, "systemd", Category::System);
    assert!(!safety.protected_names().contains("systemd"));
    let verdict = safety.validate_termination(&p);
    assert!(!verdict.allowed);
    assert!(verdict.reason.contains("never-terminate"));
    assert!(safety.is_protected(&p));
}

#[test]
fn test_protected_name_denied() {
    let verdict = manager(0).validate_termination(&process(500, "sshd", Category::Essential));
    assert!(!verdict.allowed);
    assert!(verdict.reason.contains("protected"));
}

#[test]
fn test_ordinary_process_allowed() {
    let safety = manager(0);
    let p = process(4242, "stress", Category::User);
    let verdict = safety.validate_termination(&p);
    assert!(verdict.allowed);
    assert!(!safety.is_protected(&p));
}

#[test]
fn test_consent_levels() {
    let user = process(4242, "stress", Category::User);
    let system = process(4243, "myagent", Category::System);
    let essential = process(4244, "sshd", Category::Essential);

    let safety = manager(0);
    assert!(!safety.needs_confirmation(&user));
    assert!(!safety.needs_confirmation(&system));

    safety.set_consent_level(1);
    assert!(!safety.needs_confirmation(&user));
    assert!(safety.needs_confirmation(&system));
    assert!(safety.needs_confirmation(&essential));

    safety.set_consent_level(2);
    assert!(safety.needs_confirmation(&user));
    assert!(!safety.is_monitor_only());

    safety.set_consent_level(3);
    assert!(safety.is_monitor_only());
}

#[test]
fn test_consent_level_clamped() {
    let safety = manager(17);
    assert_eq!(safety.consent_level(), ConsentLevel::MonitorOnly);
    assert_eq!(safety.set_consent_level(-4), ConsentLevel::Automatic);
    assert_eq!(safety.set_consent_level(99).as_u8(), 3);
    assert_eq!(ConsentLevel::clamped(1), ConsentLevel::NotifySystem);
    assert_eq!(ConsentLevel::ConfirmAll.to_string(), "2 (Confirm All)");
}

#[test]
fn test_runtime_protection_changes() {
    let safety = manager(0);
    let p = process(4242, "postgres", Category::User);
    assert!(safety.validate_termination(&p).allowed);

    assert!(safety.add_protected("postgres"));
    assert!(!safety.add_protected("postgres"));
    assert!(!safety.validate_termination(&p).allowed);

    assert!(safety.remove_protected("postgres"));
    assert!(!safety.remove_protected("postgres"));
    assert!(safety.validate_termination(&p).allowed);
}
