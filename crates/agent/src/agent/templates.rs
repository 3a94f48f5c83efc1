//! Operator Prompt Templates
//!
//! The system prompt sent with every inference call, plus short diagnostic
//! playbooks for common pod failure symptoms.

use crate::kubernetes::ClusterContext;

const OPERATOR_GUIDANCE: &str = r#"You operate a Kubernetes cluster on behalf of an engineer, using kubectl through two tools.

Tools:
- run_kubectl_command: runs one kubectl command. Always start the command with "kubectl". There is no shell, so pipes, redirects, "&&" and ";" are rejected.
- kubectl_context: action "list", "current" or "switch" (with "name") to see or change which cluster this session targets.

How to work:
1. Know where you are. The active context is given below; use kubectl_context when the engineer mentions a different cluster.
2. Namespaces. Pass "-n <namespace>" whenever the engineer names one. Without a namespace kubectl uses "default". Use "-A" only when asked about every namespace.
3. Build precise commands. Prefer "-o wide" for listings and "-o json" or "-o yaml" only when details are needed. Fetch logs with "--tail=100" unless asked for more.
4. Destructive commands (delete, drain, cordon, --force, --prune, --all) come back as confirmation_required and are not executed. Tell the engineer exactly what would run and ask them to reply "yes". After they confirm, issue the identical command again. Never claim a destructive command ran when it did not.
5. Troubleshoot in order: get the resource status, then describe it, then read its logs. Fix only once the cause is clear, then re-check the status to verify the fix.
6. A failed tool result is information, not the end. Read the error, correct the command and try again if it makes sense.
7. Answer concisely. Quote the relevant part of the output, point out errors and warnings, and suggest a next step."#;

/// Steps worth trying for a recognizable failure symptom.
#[derive(Debug, Clone)]
pub struct Playbook {
    pub symptom: &'static str,
    pub steps: &'static [&'static str],
}

pub const PLAYBOOKS: &[Playbook] = &[
    Playbook {
        symptom: "CrashLoopBackOff",
        steps: &[
            "kubectl describe pod <pod> -n <ns> (exit code, restart count, events)",
            "kubectl logs <pod> -n <ns> --previous --tail=100",
            "if OOMKilled, compare the memory limit with actual usage via kubectl top pod <pod> -n <ns>",
        ],
    },
    Playbook {
        symptom: "ImagePullBackOff / ErrImagePull",
        steps: &[
            "kubectl describe pod <pod> -n <ns> (the exact image and pull error)",
            "kubectl get deployment <deploy> -n <ns> -o jsonpath='{.spec.template.spec.containers[*].image}'",
            "correct the tag with kubectl set image deployment/<deploy> <container>=<image>:<tag> -n <ns>, then kubectl rollout status deployment/<deploy> -n <ns>",
        ],
    },
    Playbook {
        symptom: "Pending",
        steps: &[
            "kubectl describe pod <pod> -n <ns> (scheduling events)",
            "kubectl get nodes -o wide and kubectl describe node <node> for capacity and taints",
        ],
    },
];

/// Full system prompt for one inference call.
pub fn system_prompt(cluster: &ClusterContext) -> String {
    let mut prompt = String::from(OPERATOR_GUIDANCE);

    prompt.push_str("\n\nPlaybooks:");
    for playbook in PLAYBOOKS {
        prompt.push_str(&format!("\n- {}:", playbook.symptom));
        for (i, step) in playbook.steps.iter().enumerate() {
            prompt.push_str(&format!("\n  {}. {}", i + 1, step));
        }
    }

    prompt.push_str("\n\nCluster:\n");
    prompt.push_str(&cluster.summary());
    prompt
}
